use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "clipforge")]
#[command(author, version, about = "Export Steam game recordings as single MP4 files")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List recordings found under the detected Steam roots
    List {
        /// Only recordings of this game ID
        #[arg(long)]
        game_id: Option<String>,

        /// Only recordings of this Steam user ID
        #[arg(long)]
        steam_id: Option<String>,

        /// Recording kind to include
        #[arg(long, value_enum, default_value_t = MediaTypeArg::All)]
        media_type: MediaTypeArg,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export recordings to single MP4 files
    Export {
        /// Only recordings of this game ID
        #[arg(long)]
        game_id: Option<String>,

        /// Only recordings of this Steam user ID
        #[arg(long)]
        steam_id: Option<String>,

        /// Recording kind to export
        #[arg(long, value_enum, default_value_t = MediaTypeArg::All)]
        media_type: MediaTypeArg,

        /// Output directory (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Worker thread count (overrides config)
        #[arg(long)]
        workers: Option<usize>,

        /// Replace existing output files instead of skipping the clip
        #[arg(long)]
        overwrite: bool,

        /// Delete source fragments after a successful export
        #[arg(long)]
        delete_source: bool,

        /// Output the export report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete source fragments for recordings that already have an exported MP4
    Cleanup {
        /// Only recordings of this game ID
        #[arg(long)]
        game_id: Option<String>,

        /// Only recordings of this Steam user ID
        #[arg(long)]
        steam_id: Option<String>,

        /// Recording kind to clean up
        #[arg(long, value_enum, default_value_t = MediaTypeArg::All)]
        media_type: MediaTypeArg,

        /// Output directory to check for exported files (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the Steam recording roots detected on this machine
    DetectPaths,

    /// Parse one session manifest and display its tracks
    Probe {
        /// A session.mpd file, or a recording folder containing one
        #[arg(required = true)]
        path: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Display version information
    Version,
}

/// CLI mirror of the catalog's media-type filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MediaTypeArg {
    All,
    Manual,
    Background,
}

impl std::fmt::Display for MediaTypeArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::All => "all",
            Self::Manual => "manual",
            Self::Background => "background",
        })
    }
}
