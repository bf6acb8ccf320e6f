//! Tool configuration: TOML file plus CLI overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Where exported MP4s are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Worker threads for batch export.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-job time limit in seconds; 0 disables the limit.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// Allowed drift in bytes between a manifest-declared segment size and
    /// the file on disk.
    #[serde(default)]
    pub size_tolerance: u64,

    /// Never contact the Steam store; game names come from the cache or
    /// fall back to `Game_<id>`.
    #[serde(default)]
    pub offline: bool,

    /// Steam userdata directory; auto-detected when unset.
    #[serde(default)]
    pub userdata_path: Option<PathBuf>,

    /// Game-name cache file.
    #[serde(default = "default_name_cache")]
    pub name_cache: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            workers: default_workers(),
            job_timeout_secs: default_job_timeout(),
            size_tolerance: 0,
            offline: false,
            userdata_path: None,
            name_cache: default_name_cache(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    expand("~/Videos/clipforge")
}

/// Half the cores, clamped to 2..=6. Export is I/O bound; more threads just
/// thrash the disk.
fn default_workers() -> usize {
    (num_cpus::get() / 2).clamp(2, 6)
}

fn default_job_timeout() -> u64 {
    600
}

fn default_name_cache() -> PathBuf {
    expand("~/.config/clipforge/game_names.json")
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config.
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./clipforge.toml",
        "~/.config/clipforge/config.toml",
        "/etc/clipforge/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

fn validate_config(config: &Config) -> Result<()> {
    if config.workers == 0 {
        anyhow::bail!("Worker count cannot be 0");
    }

    if let Some(path) = &config.userdata_path {
        if !path.exists() {
            tracing::warn!("Configured userdata path does not exist: {:?}", path);
        }
    }

    Ok(())
}
