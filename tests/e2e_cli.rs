//! CLI surface tests, driving the built binary against fake Steam trees.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn clipforge() -> Command {
    Command::cargo_bin("clipforge").unwrap()
}

#[test]
fn help_names_every_subcommand() {
    clipforge()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("export"))
        .stdout(predicate::str::contains("cleanup"))
        .stdout(predicate::str::contains("detect-paths"))
        .stdout(predicate::str::contains("probe"));
}

#[test]
fn version_prints_package_version() {
    clipforge()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn probe_describes_a_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let session = dir.path().join("clip_570_20240307_210509");
    common::write_session(&session, 3);

    clipforge()
        .arg("probe")
        .arg(&session)
        .assert()
        .success()
        .stdout(predicate::str::contains("Tracks: 1"))
        .stdout(predicate::str::contains("avc1.64002A"))
        .stdout(predicate::str::contains("3 media segments"))
        .stdout(predicate::str::contains("init-stream0.m4s"));
}

#[test]
fn probe_json_is_machine_readable() {
    let dir = tempfile::tempdir().unwrap();
    let session = dir.path().join("clip_570_20240307_210509");
    common::write_session(&session, 2);

    let output = clipforge()
        .arg("probe")
        .arg("--json")
        .arg(session.join("session.mpd"))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(value["tracks"].as_array().unwrap().len(), 1);
}

#[test]
fn probe_rejects_a_broken_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.mpd");
    fs::write(&path, "<MPD><Period>").unwrap();

    clipforge()
        .arg("probe")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("malformed"));
}

#[test]
fn list_export_cleanup_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let userdata = dir.path().join("userdata");
    let clip_dir = common::write_userdata(&userdata, "1001", "clip_570_20240307_210509", 3);
    let out_dir = dir.path().join("out");
    let config = dir.path().join("clipforge.toml");
    common::write_config(&config, &userdata, &out_dir);

    clipforge()
        .args(["--config", config.to_str().unwrap(), "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("clip_570_20240307_210509"))
        .stdout(predicate::str::contains("Game_570"));

    clipforge()
        .args(["--config", config.to_str().unwrap(), "export"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 1 of 1"));
    let exported = out_dir.join("Game_570_2024-03-07_21-05-09.mp4");
    assert!(exported.exists());
    assert!(fs::metadata(&exported).unwrap().len() > 0);
    // Export alone never deletes sources.
    assert!(clip_dir.join("session.mpd").exists());

    clipforge()
        .args(["--config", config.to_str().unwrap(), "cleanup"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 cleaned"));
    assert!(!clip_dir.exists());
    assert!(exported.exists());
}

#[test]
fn second_export_skips_already_exported_clips() {
    let dir = tempfile::tempdir().unwrap();
    let userdata = dir.path().join("userdata");
    common::write_userdata(&userdata, "1001", "clip_570_20240307_210509", 2);
    let out_dir = dir.path().join("out");
    let config = dir.path().join("clipforge.toml");
    common::write_config(&config, &userdata, &out_dir);

    clipforge()
        .args(["--config", config.to_str().unwrap(), "export"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 1 of 1"));

    clipforge()
        .args(["--config", config.to_str().unwrap(), "export"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Skipping 1 already exported"))
        .stdout(predicate::str::contains("Exported 0 of 0"));

    let exported: Vec<_> = fs::read_dir(&out_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(exported, vec!["Game_570_2024-03-07_21-05-09.mp4"]);
}

#[test]
fn export_json_reports_each_job() {
    let dir = tempfile::tempdir().unwrap();
    let userdata = dir.path().join("userdata");
    common::write_userdata(&userdata, "1001", "clip_570_20240307_210509", 2);
    let out_dir = dir.path().join("out");
    let config = dir.path().join("clipforge.toml");
    common::write_config(&config, &userdata, &out_dir);

    let output = clipforge()
        .args(["--config", config.to_str().unwrap(), "export", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let jobs: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let jobs = jobs.as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["state"], "succeeded");
    assert_eq!(jobs[0]["game_id"], "570");
}

#[test]
fn failed_export_sets_the_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let userdata = dir.path().join("userdata");
    let clip_dir = common::write_userdata(&userdata, "1001", "clip_570_20240307_210509", 3);
    fs::remove_file(clip_dir.join("chunk-stream0-00002.m4s")).unwrap();
    let out_dir = dir.path().join("out");
    let config = dir.path().join("clipforge.toml");
    common::write_config(&config, &userdata, &out_dir);

    clipforge()
        .args(["--config", config.to_str().unwrap(), "export"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("FAILED"))
        .stdout(predicate::str::contains("missing segment 2"));
}

#[test]
fn filters_narrow_the_export() {
    let dir = tempfile::tempdir().unwrap();
    let userdata = dir.path().join("userdata");
    common::write_userdata(&userdata, "1001", "clip_570_20240307_210509", 2);
    common::write_userdata(&userdata, "1001", "clip_480_20240308_113000", 2);
    let out_dir = dir.path().join("out");
    let config = dir.path().join("clipforge.toml");
    common::write_config(&config, &userdata, &out_dir);

    clipforge()
        .args([
            "--config",
            config.to_str().unwrap(),
            "export",
            "--game-id",
            "480",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 1 of 1"));

    let exported: Vec<_> = fs::read_dir(&out_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(exported, vec!["Game_480_2024-03-08_11-30-00.mp4"]);
}

#[test]
fn detect_paths_honors_configured_userdata() {
    let dir = tempfile::tempdir().unwrap();
    let userdata = dir.path().join("userdata");
    common::write_userdata(&userdata, "1001", "clip_570_20240307_210509", 2);
    let config = dir.path().join("clipforge.toml");
    common::write_config(&config, &userdata, &dir.path().join("out"));

    clipforge()
        .args(["--config", config.to_str().unwrap(), "detect-paths"])
        .assert()
        .success()
        .stdout(predicate::str::contains("user 1001"))
        .stdout(predicate::str::contains("gamerecordings"));
}
