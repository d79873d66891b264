//! Tail of the daemon log.

use std::path::Path;

use anyhow::{Context, Result};

pub fn execute(config_path: Option<&Path>, lines: usize) -> Result<()> {
    let config = super::config_or_defaults(config_path);
    let path = config.log_file_path();

    if !path.exists() {
        println!("No log file found at {}.", path.display());
        println!("Logs are only written in daemon mode (dev-swarm start --daemon).");
        return Ok(());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    for line in tail(&content, lines) {
        println!("{}", line);
    }
    Ok(())
}

fn tail(content: &str, n: usize) -> Vec<&str> {
    let lines: Vec<&str> = content.lines().collect();
    lines[lines.len().saturating_sub(n)..].to_vec()
}
