//! Remove a codebase from the config file.

use std::path::Path;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use swarm_core::Config;
use swarm_core::config::{CodebaseConfig, config_file_path};

pub fn execute(config_path: Option<&Path>, identifier: &str) -> Result<()> {
    let file = config_path.map(Path::to_path_buf).unwrap_or_else(config_file_path);
    let mut config = super::load_config(Some(&file))?;

    let removed = remove(&mut config, identifier)?;
    config
        .save(&file)
        .with_context(|| format!("failed to save config to {}", file.display()))?;

    for cb in removed {
        println!("{} Removed codebase '{}' ({})", "✓".green(), cb.name, cb.repo);
    }
    Ok(())
}

/// Drop every codebase whose name or repo matches `identifier`.
fn remove(config: &mut Config, identifier: &str) -> Result<Vec<CodebaseConfig>> {
    let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut config.codebases)
        .into_iter()
        .partition(|cb| cb.name == identifier || cb.repo == identifier);
    config.codebases = kept;

    if removed.is_empty() {
        bail!("codebase not found: {}", identifier);
    }
    Ok(removed)
}
