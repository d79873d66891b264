//! Stop a running instance through its lock record.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use swarm_core::lock::StopOutcome;
use swarm_core::{Error, ProcessLock};

const STOP_POLL_ATTEMPTS: u32 = 10;
const STOP_POLL_DELAY: Duration = Duration::from_millis(500);

pub async fn execute(config_path: Option<&Path>) -> Result<()> {
    let config = super::config_or_defaults(config_path);
    let lock = ProcessLock::new(config.lock_file_path());

    let pid = match lock.request_stop() {
        Ok(pid) => pid,
        Err(Error::NotRunning) => {
            println!("dev-swarm is not running.");
            return Ok(());
        }
        Err(e) => return Err(e).context("failed to signal dev-swarm"),
    };
    println!("Stopping dev-swarm (PID: {})...", pid);

    match lock
        .wait_for_shutdown(STOP_POLL_ATTEMPTS, STOP_POLL_DELAY)
        .await
    {
        StopOutcome::Stopped => println!("{} Stopped.", "✓".green()),
        StopOutcome::MaybeStillRunning => {
            println!("{} Process may still be shutting down.", "!".yellow())
        }
    }
    Ok(())
}
