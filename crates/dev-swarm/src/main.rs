//! dev-swarm - drives coding agents from issue tracker labels.
//!
//! Watches labelled issues across configured repositories and runs one agent
//! session per eligible issue, each in its own git worktree.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod commands;

use cli::{Cli, Commands};

const DEFAULT_LOG_DIRECTIVES: &str = "dev_swarm=info,swarm_core=info";

/// Install the global subscriber. With `log_file` set, output is appended to
/// that file without colors instead of going to stderr.
pub(crate) fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVES));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .with(filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    // `start` decides where its logs go once the config is loaded.
    if !matches!(cli.command, Commands::Start { .. }) {
        init_tracing(None)?;
    }

    match cli.command {
        Commands::Init { force } => commands::init::execute(config_path, force),
        Commands::Add {
            repo,
            path,
            branch,
            name,
        } => {
            let args = commands::add::AddArgs {
                repo: &repo,
                path: &path,
                branch: branch.as_deref(),
                name: name.as_deref(),
            };
            commands::add::execute(config_path, args).await
        }
        Commands::Remove { identifier } => commands::remove::execute(config_path, &identifier),
        Commands::Start { daemon } => commands::start::execute(config_path, daemon).await,
        Commands::Stop => commands::stop::execute(config_path).await,
        Commands::Status => commands::status::execute(config_path),
        Commands::List => commands::list::execute(config_path),
        Commands::SyncLabels { repo, all } => {
            commands::sync_labels::execute(config_path, repo.as_deref(), all).await
        }
        Commands::Cleanup => commands::cleanup::execute(config_path),
        Commands::Logs { lines } => commands::logs::execute(config_path, lines),
        Commands::Version => {
            println!("dev-swarm {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
