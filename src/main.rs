mod cli;

use clipforge::{
    catalog::{Catalog, Clip, ClipFilter},
    cleanup::{self, CleanupMode, CleanupResult, ClipOutcome},
    config::{self, Config},
    names::GameNames,
    scheduler::{self, ExportOptions, ExportReport, JobState},
    steam::{self, MediaType, RecordingRoot},
};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, MediaTypeArg};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on the
    // verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "clipforge=trace,clipforge_media=trace".to_string()
        } else {
            "clipforge=info,clipforge_media=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::List {
            game_id,
            steam_id,
            media_type,
            json,
        } => list_clips(cli.config.as_deref(), game_id, steam_id, media_type, json),
        Commands::Export {
            game_id,
            steam_id,
            media_type,
            output,
            workers,
            overwrite,
            delete_source,
            json,
        } => export_clips(
            cli.config.as_deref(),
            ExportArgs {
                game_id,
                steam_id,
                media_type,
                output,
                workers,
                overwrite,
                delete_source,
                json,
            },
        ),
        Commands::Cleanup {
            game_id,
            steam_id,
            media_type,
            output,
        } => cleanup_clips(cli.config.as_deref(), game_id, steam_id, media_type, output),
        Commands::DetectPaths => detect_paths(cli.config.as_deref()),
        Commands::Probe { path, json } => probe_manifest(&path, json),
        Commands::Version => {
            println!("clipforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Recording roots from the configured userdata path, or auto-detection.
fn find_roots(config: &Config) -> Result<Vec<RecordingRoot>> {
    let userdata = match &config.userdata_path {
        Some(path) => path.clone(),
        None => steam::find_userdata_path().ok_or_else(|| {
            anyhow::anyhow!(
                "Could not detect a Steam installation; set userdata_path in the config"
            )
        })?,
    };
    let roots = steam::recording_roots(&userdata);
    if roots.is_empty() {
        anyhow::bail!("No recording directories found under {:?}", userdata);
    }
    Ok(roots)
}

fn build_filter(
    game_id: Option<String>,
    steam_id: Option<String>,
    media_type: MediaTypeArg,
) -> ClipFilter {
    ClipFilter {
        game_id,
        steam_id,
        media_type: match media_type {
            MediaTypeArg::All => None,
            MediaTypeArg::Manual => Some(MediaType::Manual),
            MediaTypeArg::Background => Some(MediaType::Background),
        },
        ..ClipFilter::default()
    }
}

fn scan_filtered(config: &Config, filter: &ClipFilter) -> Result<Vec<Clip>> {
    let roots = find_roots(config)?;
    let catalog = Catalog::scan(&roots);
    for warning in &catalog.warnings {
        tracing::warn!("{}", warning);
    }
    Ok(catalog.filtered(filter))
}

#[derive(Serialize)]
struct ClipListing<'a> {
    clip_id: &'a str,
    game_id: &'a str,
    game_name: String,
    steam_id: &'a str,
    media_type: MediaType,
    captured_at: Option<String>,
    clip_dir: &'a Path,
}

fn list_clips(
    config_path: Option<&Path>,
    game_id: Option<String>,
    steam_id: Option<String>,
    media_type: MediaTypeArg,
    json: bool,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let filter = build_filter(game_id, steam_id, media_type);
    let clips = scan_filtered(&config, &filter)?;
    let names = GameNames::load(&config.name_cache, config.offline);

    if json {
        let listings: Vec<ClipListing> = clips
            .iter()
            .map(|c| ClipListing {
                clip_id: &c.clip_id,
                game_id: &c.game_id,
                game_name: names.resolve(&c.game_id),
                steam_id: &c.steam_id,
                media_type: c.media_type,
                captured_at: c
                    .captured_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
                clip_dir: &c.clip_dir,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    if clips.is_empty() {
        println!("No recordings found.");
        return Ok(());
    }
    println!("Found {} recordings:\n", clips.len());
    for clip in &clips {
        let when = clip
            .captured_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown time".to_owned());
        println!(
            "  {:<10} {}  [{}]  {}",
            clip.media_type.to_string(),
            when,
            names.resolve(&clip.game_id),
            clip.clip_id
        );
    }
    Ok(())
}

struct ExportArgs {
    game_id: Option<String>,
    steam_id: Option<String>,
    media_type: MediaTypeArg,
    output: Option<PathBuf>,
    workers: Option<usize>,
    overwrite: bool,
    delete_source: bool,
    json: bool,
}

#[derive(Serialize)]
struct JobReportEntry<'a> {
    clip_id: &'a str,
    game_id: &'a str,
    output: &'a Path,
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    segments: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn report_entries(report: &ExportReport) -> Vec<JobReportEntry<'_>> {
    report
        .jobs
        .iter()
        .map(|job| match &job.state {
            JobState::Succeeded(container) => JobReportEntry {
                clip_id: &job.clip.clip_id,
                game_id: &job.clip.game_id,
                output: &job.output_path,
                state: "succeeded",
                duration_secs: Some(container.total_duration),
                segments: Some(container.segment_count),
                error_kind: None,
                error: None,
            },
            JobState::Failed(reason) => JobReportEntry {
                clip_id: &job.clip.clip_id,
                game_id: &job.clip.game_id,
                output: &job.output_path,
                state: "failed",
                duration_secs: None,
                segments: None,
                error_kind: Some(reason.kind()),
                error: Some(reason.to_string()),
            },
            // The report only ever holds terminal jobs.
            JobState::Pending | JobState::Running => unreachable!("non-terminal job in report"),
        })
        .collect()
}

fn export_clips(config_path: Option<&Path>, args: ExportArgs) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let filter = build_filter(args.game_id, args.steam_id, args.media_type);
    let mut clips = scan_filtered(&config, &filter)?;
    let names = GameNames::load(&config.name_cache, config.offline);
    let output_dir = args.output.unwrap_or_else(|| config.output_dir.clone());

    // Unless overwriting, clips that already have an exported file are
    // skipped rather than re-exported under a numbered name.
    if !args.overwrite {
        let before = clips.len();
        clips.retain(|clip| {
            let stem = clipforge::names::output_stem(
                &names.resolve(&clip.game_id),
                clip.captured_at,
            );
            clipforge::names::existing_output(&output_dir, &stem, "mp4").is_none()
        });
        let skipped = before - clips.len();
        if skipped > 0 {
            println!("Skipping {skipped} already exported recordings (use --overwrite to redo).");
        }
    }

    let options = ExportOptions {
        output_dir,
        workers: args.workers.unwrap_or(config.workers),
        overwrite: args.overwrite,
        size_tolerance: config.size_tolerance,
        job_timeout: (config.job_timeout_secs > 0)
            .then(|| Duration::from_secs(config.job_timeout_secs)),
        cancel: Arc::new(AtomicBool::new(false)),
    };

    let report = scheduler::run(clips, &names, &options)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report_entries(&report))?);
    } else {
        print_report(&report);
    }

    if args.delete_source {
        let result = cleanup::cleanup(&report, CleanupMode::PostExport);
        if !args.json {
            print_cleanup(&result);
        }
    }

    if report.failed_count() > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn print_report(report: &ExportReport) {
    println!(
        "\nExported {} of {} clips.",
        report.succeeded_count(),
        report.jobs.len()
    );
    for job in report.succeeded() {
        if let JobState::Succeeded(container) = &job.state {
            println!(
                "  ok      {}  ->  {}  ({:.1}s)",
                job.clip.clip_id,
                container.output_path.display(),
                container.total_duration
            );
        }
    }
    for job in report.failed() {
        if let JobState::Failed(reason) = &job.state {
            println!(
                "  FAILED  {}  ({}): {}",
                job.clip.clip_id,
                reason.kind(),
                reason
            );
        }
    }
}

fn print_cleanup(result: &CleanupResult) {
    println!(
        "\nCleanup: {} cleaned, {} unverifiable, {} failed.",
        result.deleted_count(),
        result.unverifiable_count(),
        result.failed_count()
    );
    for (clip, outcome) in &result.outcomes {
        match outcome {
            ClipOutcome::Deleted { files_removed } => {
                println!("  removed {} files of {}", files_removed, clip.clip_id)
            }
            ClipOutcome::AlreadyClean => {}
            ClipOutcome::Unverifiable(reason) => {
                println!("  kept    {}: {}", clip.clip_id, reason)
            }
            ClipOutcome::Failed(e) => println!("  FAILED  {}: {}", clip.clip_id, e),
        }
    }
}

fn cleanup_clips(
    config_path: Option<&Path>,
    game_id: Option<String>,
    steam_id: Option<String>,
    media_type: MediaTypeArg,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let filter = build_filter(game_id, steam_id, media_type);
    let clips = scan_filtered(&config, &filter)?;
    let names = GameNames::load(&config.name_cache, config.offline);
    let output_dir = output.unwrap_or_else(|| config.output_dir.clone());

    let report = cleanup::report_from_existing(clips, &output_dir, &names)?;
    println!(
        "{} recordings have an exported file under {:?}.",
        report.jobs.len(),
        output_dir
    );
    let result = cleanup::cleanup(&report, CleanupMode::CleanupOnly);
    print_cleanup(&result);

    if result.failed_count() > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn detect_paths(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let detected = match &config.userdata_path {
        Some(path) => vec![path.clone()],
        None => steam::detect_userdata_paths(),
    };
    if detected.is_empty() {
        println!("No Steam userdata directory found.");
        return Ok(());
    }
    for userdata in &detected {
        println!("userdata: {}", userdata.display());
        for root in steam::recording_roots(userdata) {
            println!(
                "  {:<10} user {:<12} {}",
                root.media_type.to_string(),
                root.steam_id,
                root.path.display()
            );
        }
    }
    Ok(())
}

fn probe_manifest(path: &Path, json: bool) -> Result<()> {
    let manifest_path = if path.is_dir() {
        path.join("session.mpd")
    } else {
        path.to_path_buf()
    };
    let xml = std::fs::read_to_string(&manifest_path)
        .map_err(|e| anyhow::anyhow!("Cannot read manifest {:?}: {}", manifest_path, e))?;
    let manifest = clipforge_media::SegmentManifest::parse(&xml)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }

    println!("Manifest: {}", manifest_path.display());
    if let Some(duration) = manifest.presentation_duration {
        println!("Declared duration: {:.3}s", duration);
    }
    println!("Tracks: {}", manifest.tracks.len());
    for track in &manifest.tracks {
        let codec = track.codecs.as_deref().unwrap_or("unknown codec");
        print!(
            "  [{}] {} ({}), timescale {}, {} media segments",
            track.id,
            track.kind,
            codec,
            track.timescale,
            track.media_count()
        );
        if let Some(secs) = track.declared_duration_secs() {
            print!(", {:.3}s declared", secs);
        }
        println!();
        if let Some(init) = track.init() {
            println!("      init: {}", init.file_name);
        }
    }
    Ok(())
}
