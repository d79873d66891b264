//! Lock status and configuration summary.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use swarm_core::ProcessLock;

pub fn execute(config_path: Option<&Path>) -> Result<()> {
    let defaults = super::config_or_defaults(config_path);
    let status = ProcessLock::new(defaults.lock_file_path()).status();

    if status.held {
        let pid = status.owner_pid.map_or_else(|| "?".to_string(), |p| p.to_string());
        println!("{} dev-swarm is running (PID: {})", "●".green(), pid);
    } else {
        println!("{} dev-swarm is not running", "○".dimmed());
    }

    let config = match super::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!();
            println!("{} {:#}", "Config:".cyan(), e);
            return Ok(());
        }
    };

    let enabled = config.enabled_codebases().len();
    let s = &config.settings;
    println!();
    println!("{}", "Configuration:".cyan());
    println!("  Config dir:   {}", config.config_dir.display());
    println!("  Worktrees:    {}", config.worktrees_root().display());
    println!(
        "  Codebases:    {} total, {} enabled",
        config.codebases.len(),
        enabled
    );
    println!("  Max sessions: {}", s.max_concurrent_sessions);
    println!(
        "  Poll interval: {}s (active: {}s)",
        s.poll_interval_secs, s.active_poll_interval_secs
    );
    println!("  Agent:        {} {}", s.agent.program, s.agent.args.join(" "));

    if !config.codebases.is_empty() {
        println!();
        println!("{}", "Codebases:".cyan());
        for cb in &config.codebases {
            let state = if cb.enabled {
                "enabled".green()
            } else {
                "disabled".dimmed()
            };
            println!("  - {} ({}): {}", cb.name, cb.repo, state);
        }
    }
    Ok(())
}
