//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// jsync - Incremental Jira to SQLite synchronization
#[derive(Parser, Debug)]
#[command(name = "jsync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.jsync/data/jsync.db, or JSYNC_DB)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Actor name for the audit trail (default: JSYNC_ACTOR, then USER)
    #[arg(long, global = true)]
    pub actor: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database and apply the schema
    Init {
        /// Recreate an existing database
        #[arg(long)]
        force: bool,
    },

    /// Detect changed issues and sync them
    Sync(SyncArgs),

    /// Sync specific issues, whether or not they changed
    Fetch {
        /// Numeric issue ids
        #[arg(required = true)]
        ids: Vec<String>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Refresh stored sprints that may have changed state
    Sprints {
        /// Sprint states to refresh (repeatable; default from config: active, future)
        #[arg(long = "state", value_name = "STATE")]
        states: Vec<String>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show store counts and recent runs
    Status {
        /// Number of recent runs to show
        #[arg(long, default_value_t = 5)]
        runs: u32,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Print version information
    Version,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// JQL filter selecting the issues to sync
    #[arg(long)]
    pub jql: String,

    /// Only look at issues updated since the last synced update
    #[arg(long)]
    pub incremental: bool,

    /// Also save every sprint and fix version listed on this agile board
    #[arg(long, value_name = "ID", conflicts_with = "incremental")]
    pub board: Option<u64>,

    /// Give up after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Supported shells for completions.
#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}
