use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

#[derive(Parser, Debug)]
#[command(name = "gamesave")]
#[command(about = "Inspect and edit double-buffered game saves in a local store", long_about = None)]
#[command(version = version_string())]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Store root (holds config.json and users/)
    #[arg(long, global = true, env = "GAMESAVE_HOME")]
    pub root: Option<PathBuf>,

    /// User whose saves to open (defaults to the configured user)
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Log to stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the active slot, quota and container summary
    #[command(alias = "st")]
    Status,

    /// List containers in the store
    #[command(alias = "ls")]
    List {
        /// Also list each container's blobs
        #[arg(long)]
        blobs: bool,
    },

    /// Load and print the active board
    Show {
        /// Force a full read instead of a cached get
        #[arg(long)]
        read: bool,
    },

    /// Make a slot the active one
    Activate {
        /// Slot number, starting at 1
        slot: u32,
    },

    /// Change the active board and save it
    Edit {
        #[arg(long)]
        score: Option<u32>,

        #[arg(long)]
        words: Option<u32>,

        /// Letters filling the grid row by row; anything else leaves a blank
        #[arg(long)]
        tiles: Option<String>,
    },

    /// Delete the active board
    #[command(alias = "rm")]
    Delete {
        /// Delete only the board's blobs and keep its container
        #[arg(long)]
        blobs_only: bool,
    },

    /// Get or set configuration
    Config {
        /// Configuration key (e.g., slot_count)
        key: Option<String>,

        /// Value to set (if omitted, prints current value)
        value: Option<String>,
    },
}

/// "0.3.2" for releases, "0.3.2@abc1234 2024-01-15 14:30" otherwise.
fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");
    const GIT_COMMIT_DATE: &str = env!("GIT_COMMIT_DATE");
    const IS_RELEASE: &str = env!("IS_RELEASE");

    static VERSION_STRING: OnceLock<String> = OnceLock::new();
    VERSION_STRING.get_or_init(|| {
        if IS_RELEASE == "true" || GIT_HASH.is_empty() {
            VERSION.to_string()
        } else {
            format!("{VERSION}@{GIT_HASH} {GIT_COMMIT_DATE}")
        }
    })
}
