//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Label-driven orchestrator for coding agents
///
/// Moves issues through their workflow by running an agent whenever an issue
/// carries a label that asks for one.
#[derive(Parser, Debug)]
#[command(name = "dev-swarm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (default: ~/.config/dev-swarm/config.toml)
    #[arg(short, long, global = true, env = "DEV_SWARM_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter config file
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Start the orchestrator
    Start {
        /// Log to the log file instead of the terminal
        #[arg(short, long)]
        daemon: bool,
    },

    /// Stop a running orchestrator
    Stop,

    /// Show whether the orchestrator is running and what it is configured for
    Status,

    /// List configured codebases and their pickup labels
    List,

    /// Add a codebase to monitor
    Add {
        /// Repository in owner/name form
        #[arg(short, long)]
        repo: String,

        /// Local checkout of the repository
        #[arg(short, long)]
        path: PathBuf,

        /// Default branch (detected from the checkout if omitted)
        #[arg(short, long)]
        branch: Option<String>,

        /// Display name (defaults to the repository name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Remove a codebase by name or owner/name
    Remove {
        identifier: String,
    },

    /// Create or update label definitions on repositories
    SyncLabels {
        /// Repository in owner/name form
        repo: Option<String>,

        /// Sync every enabled codebase
        #[arg(short, long, conflicts_with = "repo")]
        all: bool,
    },

    /// Remove orphaned workspaces
    Cleanup,

    /// Show the end of the daemon log
    Logs {
        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },

    /// Print version
    Version,
}
