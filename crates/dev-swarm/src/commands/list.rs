//! Configured codebases and their resolved pickup labels.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use swarm_core::PickupRule;

pub fn execute(config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let codebases = config.codebases();

    if codebases.is_empty() {
        println!("No codebases configured. Add one under [[codebases]] in the config file.");
        return Ok(());
    }

    for cb in codebases {
        let state = if cb.enabled {
            "enabled".green()
        } else {
            "disabled".dimmed()
        };
        println!("{} ({}) {}", cb.name.bold(), cb.repo, state);
        println!("  Path:   {}", cb.local_path.display());
        println!("  Branch: {}", cb.default_branch);
        println!("  Pickup labels:");
        for label in cb.labels.pickup_labels() {
            let rule = match label.pickup {
                PickupRule::Always => "always",
                PickupRule::OnNewUserInput => "on new user input",
                PickupRule::Never => "never",
            };
            println!("    {} ({})", label.name.cyan(), rule);
        }
        println!();
    }
    Ok(())
}
