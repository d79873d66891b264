//! Run the orchestrator until interrupted.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use swarm_core::orchestrator::{StateEvent, StateUpdate};
use swarm_core::{Config, GhCli, GitWorkspaces, Orchestrator, ProcessLock};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub async fn execute(config_path: Option<&Path>, daemon: bool) -> Result<()> {
    let config = super::load_config(config_path)?;
    let log_file = daemon.then(|| config.log_file_path());
    crate::init_tracing(log_file.as_deref())?;

    let gh = GhCli::new();
    verify_dependencies(&gh, &config).await?;

    if config.enabled_codebases().is_empty() {
        warn!("No enabled codebases configured; nothing will be picked up");
    }

    let lock = ProcessLock::new(config.lock_file_path());
    lock.acquire()
        .context("failed to acquire lock (is dev-swarm already running?)")?;

    let result = run(config, gh, daemon).await;

    if let Err(e) = lock.release() {
        warn!("Failed to release lock: {}", e);
    }
    result
}

async fn run(config: Config, gh: GhCli, daemon: bool) -> Result<()> {
    let orch = Arc::new(Orchestrator::new(
        config,
        Arc::new(gh),
        Arc::new(GitWorkspaces::new()),
    ));
    let updates = orch
        .subscribe()
        .context("orchestrator update stream already taken")?;

    orch.start().await.context("failed to start orchestrator")?;
    info!(pid = std::process::id(), daemon, "dev-swarm started");
    if !daemon {
        println!(
            "{} dev-swarm running (PID {}). Press Ctrl-C to stop.",
            "●".green(),
            std::process::id()
        );
    }

    let printer = tokio::spawn(report_updates(updates, daemon));

    let signalled = shutdown_signal().await;
    info!("Received shutdown signal");
    orch.stop().await;
    printer.abort();
    signalled
}

async fn shutdown_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

async fn verify_dependencies(gh: &GhCli, config: &Config) -> Result<()> {
    if !gh.is_installed() {
        bail!("gh CLI is not installed. Install: https://cli.github.com");
    }
    if !gh.is_authenticated().await {
        bail!("gh CLI is not authenticated. Run: gh auth login");
    }
    let agent = &config.settings.agent.program;
    if which::which(agent).is_err() {
        bail!("agent command '{}' was not found in PATH", agent);
    }
    Ok(())
}

/// Daemon mode logs every update; foreground mode prints them.
async fn report_updates(mut updates: mpsc::Receiver<StateUpdate>, daemon: bool) {
    while let Some(update) = updates.recv().await {
        let Some(line) = describe(&update.event) else {
            continue;
        };
        if daemon {
            info!("{}", line);
        } else {
            println!("{} {}", update.timestamp.format("%H:%M:%S").to_string().dimmed(), line);
        }
    }
}

fn describe(event: &StateEvent) -> Option<String> {
    let line = match event {
        StateEvent::IssueFound {
            codebase,
            issue,
            label,
        } => format!("{} #{} found with {}", codebase, issue, label.cyan()),
        StateEvent::IssueRemoved { codebase, issue } => {
            format!("{} #{} no longer tracked", codebase, issue)
        }
        StateEvent::LabelChanged {
            codebase,
            issue,
            from,
            to,
        } => format!("{} #{} {} → {}", codebase, issue, from, to.cyan()),
        StateEvent::SessionStarted { info, .. } => format!(
            "{} session {} started in {}",
            "▶".green(),
            info.key,
            info.workspace.display()
        ),
        StateEvent::SessionOutput(output) => {
            format!("{} {}", format!("[{}]", output.key).dimmed(), output.line.text)
        }
        StateEvent::SessionEnded(status) => match &status.error {
            Some(error) => format!("{} session {} {}: {}", "■".red(), status.key, status.status, error),
            None => format!(
                "{} session {} {} (exit {})",
                "■".green(),
                status.key,
                status.status,
                status.exit_code.map_or_else(|| "?".to_string(), |c| c.to_string())
            ),
        },
        StateEvent::Error { codebase, message } => match codebase {
            Some(codebase) => format!("{} {}: {}", "✗".red(), codebase, message),
            None => format!("{} {}", "✗".red(), message),
        },
        StateEvent::PollComplete => return None,
    };
    Some(line)
}
