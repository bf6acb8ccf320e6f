//! Recording catalog: scanning roots into immutable clip snapshots.
//!
//! A scan never fails; unreadable directories and folders without a session
//! manifest become warnings. Folder names carry the metadata
//! (`<prefix>_<gameid>_<YYYYMMDD>_<HHMMSS>`); fields that do not parse
//! degrade to `"unknown"`/`None` and the clip is cataloged anyway.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::steam::{MediaType, RecordingRoot};

/// One recording session, ready to export.
#[derive(Debug, Clone, Serialize)]
pub struct Clip {
    /// Folder name, suffixed `#N` when a folder holds several sessions.
    pub clip_id: String,
    /// Game ID from the folder name, or `"unknown"`.
    pub game_id: String,
    /// Owning Steam user ID.
    pub steam_id: String,
    pub media_type: MediaType,
    /// Capture timestamp from the folder name, when parseable.
    pub captured_at: Option<NaiveDateTime>,
    /// The session manifest.
    pub manifest_path: PathBuf,
    /// Directory the manifest's segment files live in.
    pub segment_dir: PathBuf,
    /// Top-level recording folder; cleanup prunes up to here.
    pub clip_dir: PathBuf,
}

/// Immutable scan snapshot.
#[derive(Debug, Default)]
pub struct Catalog {
    /// Newest first; unknown capture times last.
    pub clips: Vec<Clip>,
    pub warnings: Vec<String>,
}

impl Catalog {
    /// Scan every root for recording folders.
    pub fn scan(roots: &[RecordingRoot]) -> Catalog {
        let mut clips = Vec::new();
        let mut warnings = Vec::new();

        for root in roots {
            let entries = match fs::read_dir(&root.path) {
                Ok(entries) => entries,
                Err(e) => {
                    let msg = format!("Cannot read recording root {:?}: {}", root.path, e);
                    tracing::warn!("{}", msg);
                    warnings.push(msg);
                    continue;
                }
            };

            let mut folders: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.is_dir()
                        && p.file_name()
                            .is_some_and(|n| n.to_string_lossy().contains('_'))
                })
                .collect();
            folders.sort();

            for folder in folders {
                let manifests = find_manifests(&folder);
                if manifests.is_empty() {
                    let msg = format!("No session manifest in {:?}, skipping", folder);
                    tracing::warn!("{}", msg);
                    warnings.push(msg);
                    continue;
                }
                let several = manifests.len() > 1;
                for (i, manifest_path) in manifests.into_iter().enumerate() {
                    clips.push(make_clip(root, &folder, manifest_path, several.then_some(i)));
                }
            }
        }

        clips.sort_by(|a, b| {
            b.captured_at
                .cmp(&a.captured_at)
                .then_with(|| a.clip_id.cmp(&b.clip_id))
        });
        Catalog { clips, warnings }
    }
}

/// All `session.mpd` files under a recording folder, sorted.
///
/// Background recordings keep their timeline sessions in subdirectories, so
/// the search has to recurse.
fn find_manifests(folder: &Path) -> Vec<PathBuf> {
    let mut manifests: Vec<PathBuf> = WalkDir::new(folder)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == "session.mpd")
        .map(|e| e.into_path())
        .collect();
    manifests.sort();
    manifests
}

fn make_clip(
    root: &RecordingRoot,
    folder: &Path,
    manifest_path: PathBuf,
    session: Option<usize>,
) -> Clip {
    let folder_name = folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".to_owned());
    let (game_id, captured_at) = parse_folder_name(&folder_name);
    let clip_id = match session {
        Some(i) => format!("{folder_name}#{}", i + 1),
        None => folder_name,
    };
    let segment_dir = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| folder.to_path_buf());
    Clip {
        clip_id,
        game_id,
        steam_id: root.steam_id.clone(),
        media_type: root.media_type,
        captured_at,
        manifest_path,
        segment_dir,
        clip_dir: folder.to_path_buf(),
    }
}

/// `<prefix>_<gameid>_<YYYYMMDD>_<HHMMSS>`; missing pieces degrade.
fn parse_folder_name(name: &str) -> (String, Option<NaiveDateTime>) {
    let parts: Vec<&str> = name.split('_').collect();
    let game_id = match parts.get(1) {
        Some(id) if !id.is_empty() => (*id).to_owned(),
        _ => "unknown".to_owned(),
    };
    let captured_at = if parts.len() >= 3 {
        let stamp = format!("{}{}", parts[parts.len() - 2], parts[parts.len() - 1]);
        NaiveDateTime::parse_from_str(&stamp, "%Y%m%d%H%M%S").ok()
    } else {
        None
    };
    (game_id, captured_at)
}

/// AND-composed clip predicate; pure over the clip value.
#[derive(Debug, Clone, Default)]
pub struct ClipFilter {
    pub game_id: Option<String>,
    pub steam_id: Option<String>,
    /// `None` admits every media type.
    pub media_type: Option<MediaType>,
    /// Clip folders considered already exported; pre-built by the caller
    /// from a snapshot of the output directory.
    pub exclude_clip_dirs: HashSet<PathBuf>,
}

impl ClipFilter {
    pub fn matches(&self, clip: &Clip) -> bool {
        if let Some(game_id) = &self.game_id {
            if clip.game_id != *game_id {
                return false;
            }
        }
        if let Some(steam_id) = &self.steam_id {
            if clip.steam_id != *steam_id {
                return false;
            }
        }
        if let Some(media_type) = self.media_type {
            if clip.media_type != media_type {
                return false;
            }
        }
        !self.exclude_clip_dirs.contains(&clip.clip_dir)
    }
}

impl Catalog {
    /// Clips passing the filter, in catalog order.
    pub fn filtered(&self, filter: &ClipFilter) -> Vec<Clip> {
        self.clips
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect()
    }
}
