//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// Offline-first record store with background sync
#[derive(Parser, Debug)]
#[command(name = "osync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.offline-sync/data/offline.db)
    #[arg(long, global = true, env = "OSYNC_DB")]
    pub db: Option<PathBuf>,

    /// Config file (default: ~/.offline-sync/config.json)
    #[arg(long, global = true, env = "OSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Remote datastore base URL (overrides config; omit for local-only mode)
    #[arg(long, global = true)]
    pub remote: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase logging verbosity (-v, -vv)
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
    /// Create the local database
    Init {
        /// Recreate the database if it already exists
        #[arg(long)]
        force: bool,
    },

    /// Print version information
    Version,

    /// Create a record (queued for upload)
    Create(CreateArgs),

    /// Update fields of a record (queued for upload)
    Update(UpdateArgs),

    /// Delete a record (queued for upload)
    Delete {
        /// Entity type (e.g. tours)
        entity: String,

        /// Record id
        id: String,
    },

    /// Show one record
    Get {
        /// Entity type (e.g. tours)
        entity: String,

        /// Record id
        id: String,
    },

    /// List records of an entity type
    List(ListArgs),

    /// Inspect the sync queue
    Queue(QueueArgs),

    /// Show sync status
    Status,

    /// Run one sync pass against the remote
    Sync,

    /// Requeue failed items with a fresh retry budget
    RetryFailed,

    /// Delete completed queue items past the retention window
    Prune {
        /// Override the retention window, in hours
        #[arg(long)]
        older_than_hours: Option<u64>,
    },

    /// Sync in the background until interrupted
    Daemon {
        /// Seconds between remote health checks
        #[arg(long, default_value = "5")]
        health_interval: u64,
    },

    /// Show the effective configuration
    Config,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
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

// ============================================================================
// Record Commands
// ============================================================================

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Entity type (e.g. tours)
    pub entity: String,

    /// Record fields as a JSON object; may include "id"
    #[arg(short, long)]
    pub data: String,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Entity type (e.g. tours)
    pub entity: String,

    /// Record id
    pub id: String,

    /// Fields to change as a JSON object
    #[arg(short, long)]
    pub data: String,
}

#[derive(Args, Debug, Default)]
pub struct ListArgs {
    /// Entity type (e.g. tours)
    pub entity: String,

    /// Field equality filter, repeatable (e.g. --where status=open)
    #[arg(short, long = "where", value_name = "FIELD=VALUE")]
    pub filters: Vec<String>,

    /// Filter by sync status (pending, synced)
    #[arg(short, long)]
    pub status: Option<String>,

    /// Include records deleted locally but not yet synced
    #[arg(long)]
    pub include_deleted: bool,

    /// Maximum records to return
    #[arg(short, long)]
    pub limit: Option<usize>,
}

// ============================================================================
// Queue Commands
// ============================================================================

#[derive(Args, Debug, Default)]
pub struct QueueArgs {
    /// Filter by status (pending, processing, completed, failed)
    #[arg(short, long)]
    pub status: Option<String>,

    /// Filter by entity type
    #[arg(short, long)]
    pub entity: Option<String>,

    /// Maximum items to return
    #[arg(short, long, default_value = "50")]
    pub limit: usize,
}
