//! Output naming: game-name resolution, sanitization, uniquification.
//!
//! Exported files are named `<GameName>_<YYYY-MM-DD_HH-MM-SS>.mp4`. Game
//! names come from a JSON cache file backed by the Steam store's
//! `appdetails` endpoint; offline mode skips the store and falls back to
//! `Game_<id>`.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DETAILS_URL: &str = "https://store.steampowered.com/api/appdetails";

/// Game-ID to display-name resolver with a JSON cache file.
///
/// The cache map is the only mutable state shared across an export run;
/// all lookups happen during sequential job preparation, so the lock is
/// uncontended in practice.
pub struct GameNames {
    cache_path: PathBuf,
    names: Mutex<BTreeMap<String, String>>,
    client: Option<reqwest::blocking::Client>,
}

impl GameNames {
    /// Load the cache file (absent or unreadable means empty) and set up
    /// the store client unless `offline`.
    pub fn load(cache_path: &Path, offline: bool) -> Self {
        let names = match fs::read_to_string(cache_path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable game-name cache: {}", e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        let client = if offline {
            None
        } else {
            reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .ok()
        };
        Self {
            cache_path: cache_path.to_path_buf(),
            names: Mutex::new(names),
            client,
        }
    }

    /// Display name for a game ID: cache, then the Steam store, then
    /// `Game_<id>`. Every answer is cached, including the fallback.
    pub fn resolve(&self, game_id: &str) -> String {
        if let Some(name) = self.names.lock().get(game_id) {
            return name.clone();
        }
        let name = self
            .fetch(game_id)
            .unwrap_or_else(|| format!("Game_{game_id}"));
        self.names.lock().insert(game_id.to_owned(), name.clone());
        if let Err(e) = self.save() {
            tracing::warn!("Could not save game-name cache: {:#}", e);
        }
        name
    }

    fn fetch(&self, game_id: &str) -> Option<String> {
        // Non-numeric IDs (catalog "unknown" and friends) pass through as
        // their own display name.
        if game_id.is_empty() || !game_id.bytes().all(|b| b.is_ascii_digit()) {
            return Some(game_id.to_owned());
        }
        let client = self.client.as_ref()?;
        let url = format!("{APP_DETAILS_URL}?appids={game_id}&filters=basic");
        let body: serde_json::Value = client
            .get(&url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .and_then(|r| r.json())
            .map_err(|e| {
                tracing::warn!("Failed to fetch game name for {}: {}", game_id, e);
                e
            })
            .ok()?;
        let entry = body.get(game_id)?;
        if !entry.get("success")?.as_bool()? {
            return None;
        }
        Some(entry.get("data")?.get("name")?.as_str()?.to_owned())
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory: {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(&*self.names.lock())?;
        fs::write(&self.cache_path, content)
            .with_context(|| format!("Failed to write game-name cache: {:?}", self.cache_path))
    }
}

/// Replace filesystem-hostile characters (and spaces) with underscores,
/// collapse runs, and trim the ends.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(
            c,
            '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\\' | '/' | ' '
        ) {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    while out.contains("__") {
        out = out.replace("__", "_");
    }
    out.trim_matches('_').to_owned()
}

/// `<GameName>_<YYYY-MM-DD_HH-MM-SS>` stem for an exported clip.
pub fn output_stem(game_name: &str, captured_at: Option<NaiveDateTime>) -> String {
    let date = match captured_at {
        Some(ts) => ts.format("%Y-%m-%d_%H-%M-%S").to_string(),
        None => "UnknownDate".to_owned(),
    };
    sanitize_filename(&format!("{game_name}_{date}"))
}

/// First `<stem>.<ext>` or `<stem>_N.<ext>` under `dir` that does not exist.
pub fn unique_output_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let mut candidate = dir.join(format!("{stem}.{ext}"));
    let mut counter = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}_{counter}.{ext}"));
        counter += 1;
    }
    candidate
}

/// An already-exported file for `stem`, checking numbered variants too.
pub fn existing_output(dir: &Path, stem: &str, ext: &str) -> Option<PathBuf> {
    let exact = dir.join(format!("{stem}.{ext}"));
    if exact.exists() {
        return Some(exact);
    }
    for counter in 1..=100 {
        let numbered = dir.join(format!("{stem}_{counter}.{ext}"));
        if numbered.exists() {
            return Some(numbered);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn sanitizes_invalid_characters() {
        assert_eq!(sanitize_filename("Half-Life 2: Episode Two"), "Half-Life_2_Episode_Two");
        assert_eq!(sanitize_filename("a<b>c\"d|e?f*g\\h/i"), "a_b_c_d_e_f_g_h_i");
        assert_eq!(sanitize_filename("__trimmed__"), "trimmed");
    }

    #[test]
    fn output_stem_formats_capture_time() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(21, 5, 9)
            .unwrap();
        assert_eq!(output_stem("Dota 2", Some(ts)), "Dota_2_2024-03-07_21-05-09");
        assert_eq!(output_stem("Dota 2", None), "Dota_2_UnknownDate");
    }

    #[test]
    fn unique_path_counts_up() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            unique_output_path(dir.path(), "clip", "mp4"),
            dir.path().join("clip.mp4")
        );
        fs::write(dir.path().join("clip.mp4"), b"x").unwrap();
        fs::write(dir.path().join("clip_1.mp4"), b"x").unwrap();
        assert_eq!(
            unique_output_path(dir.path(), "clip", "mp4"),
            dir.path().join("clip_2.mp4")
        );
    }

    #[test]
    fn existing_output_finds_numbered_variants() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(existing_output(dir.path(), "clip", "mp4"), None);
        fs::write(dir.path().join("clip_3.mp4"), b"x").unwrap();
        assert_eq!(
            existing_output(dir.path(), "clip", "mp4"),
            Some(dir.path().join("clip_3.mp4"))
        );
    }

    #[test]
    fn offline_resolver_falls_back_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("names.json");
        let names = GameNames::load(&cache, true);

        assert_eq!(names.resolve("570"), "Game_570");
        assert!(cache.exists());

        // A fresh instance answers from the written cache.
        let reloaded = GameNames::load(&cache, true);
        assert_eq!(reloaded.resolve("570"), "Game_570");
    }

    #[test]
    fn non_numeric_id_is_its_own_name() {
        let dir = tempfile::tempdir().unwrap();
        let names = GameNames::load(&dir.path().join("names.json"), true);
        assert_eq!(names.resolve("unknown"), "unknown");
    }

    #[test]
    fn seeded_cache_wins_over_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("names.json");
        fs::write(&cache, r#"{"570": "Dota 2"}"#).unwrap();
        let names = GameNames::load(&cache, true);
        assert_eq!(names.resolve("570"), "Dota 2");
    }
}
