//! Steam installation discovery.
//!
//! Finds the `userdata` directory of a Steam install, enumerates its numeric
//! user IDs, and produces the recording roots the catalog scans. Recordings
//! live under `gamerecordings/clips` (manual clips) and `gamerecordings/video`
//! (background recordings), either beneath the user directory or beneath the
//! custom location named by `BackgroundRecordPath` in `localconfig.vdf`.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// What kind of recording a root holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// User-triggered clips (`clips/`).
    Manual,
    /// Continuous background recording (`video/`).
    Background,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Background => write!(f, "background"),
        }
    }
}

/// One directory holding recording folders for one Steam user.
#[derive(Debug, Clone)]
pub struct RecordingRoot {
    pub path: PathBuf,
    pub steam_id: String,
    pub media_type: MediaType,
}

/// Auto-detect Steam `userdata` directories on this machine.
///
/// Checks the standard install locations per OS and keeps those whose
/// `userdata` contains at least one numeric user directory.
pub fn detect_userdata_paths() -> Vec<PathBuf> {
    let mut found = Vec::new();
    for steam_path in steam_install_candidates() {
        let userdata = steam_path.join("userdata");
        if userdata.is_dir() && !numeric_subdirs(&userdata).is_empty() {
            found.push(userdata);
        }
    }
    found
}

/// The first detected userdata path, with a log line either way.
pub fn find_userdata_path() -> Option<PathBuf> {
    let detected = detect_userdata_paths();
    match detected.into_iter().next() {
        Some(path) => {
            tracing::info!("Auto-detected Steam userdata path: {:?}", path);
            Some(path)
        }
        None => {
            tracing::error!("Could not auto-detect Steam userdata path");
            None
        }
    }
}

fn steam_install_candidates() -> Vec<PathBuf> {
    let home = PathBuf::from(shellexpand::tilde("~").into_owned());
    if cfg!(target_os = "windows") {
        vec![
            PathBuf::from("C:/Program Files (x86)/Steam"),
            PathBuf::from("C:/Program Files/Steam"),
            PathBuf::from("D:/Steam"),
            PathBuf::from("E:/Steam"),
        ]
    } else if cfg!(target_os = "macos") {
        vec![
            home.join("Library/Application Support/Steam"),
            PathBuf::from("/Applications/Steam.app/Contents/MacOS"),
            home.join("Applications/Steam.app/Contents/MacOS"),
        ]
    } else {
        vec![
            home.join(".steam/steam"),
            home.join(".local/share/Steam"),
            PathBuf::from("/usr/share/steam"),
            PathBuf::from("/opt/steam"),
        ]
    }
}

/// Numeric child directories (Steam user IDs), sorted for stable output.
fn numeric_subdirs(dir: &Path) -> Vec<String> {
    let mut ids = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.is_empty()
                && name.bytes().all(|b| b.is_ascii_digit())
                && entry.path().is_dir()
            {
                ids.push(name);
            }
        }
    }
    ids.sort();
    ids
}

/// Enumerate recording roots for every user under `userdata`.
///
/// Each user contributes the default `gamerecordings` pair plus, when
/// `localconfig.vdf` names one, the custom record location. Roots whose
/// directory does not exist are omitted.
pub fn recording_roots(userdata: &Path) -> Vec<RecordingRoot> {
    let mut roots = Vec::new();
    for steam_id in numeric_subdirs(userdata) {
        let user_dir = userdata.join(&steam_id);
        let mut bases = vec![user_dir.join("gamerecordings")];
        if let Some(custom) = background_record_path(&user_dir) {
            tracing::debug!("User {} records to custom path {:?}", steam_id, custom);
            bases.push(custom);
        }
        for base in bases {
            for (sub, media_type) in [
                ("clips", MediaType::Manual),
                ("video", MediaType::Background),
            ] {
                let path = base.join(sub);
                if path.is_dir() {
                    roots.push(RecordingRoot {
                        path,
                        steam_id: steam_id.clone(),
                        media_type,
                    });
                }
            }
        }
    }
    roots
}

/// Custom record location from `config/localconfig.vdf`, when set.
///
/// The vdf is line-scanned rather than parsed; Steam writes the key/value
/// pair on one line and nothing else in the file uses this key.
pub fn background_record_path(user_dir: &Path) -> Option<PathBuf> {
    let path = user_dir.join("config").join("localconfig.vdf");
    let content = fs::read_to_string(path).ok()?;
    let re = Regex::new(r#""BackgroundRecordPath"\s+"([^"]+)""#).ok()?;
    let value = re.captures(&content)?.get(1)?.as_str();
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}
