//! Starter config command.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use swarm_core::Config;
use swarm_core::config::config_file_path;

pub fn execute(path: Option<&Path>, force: bool) -> Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_file_path);

    if path.exists() && !force {
        println!(
            "{} Config file already exists at {}",
            "!".yellow(),
            path.display()
        );
        println!("  Use --force to overwrite it.");
        return Ok(());
    }

    Config::default_with_example()
        .save(&path)
        .with_context(|| format!("failed to write config to {}", path.display()))?;

    println!("{} Created config file at {}", "✓".green(), path.display());
    println!();
    println!("{}", "Next steps:".cyan());
    println!("  1. Edit the config file and add your repositories under [[codebases]]");
    println!("  2. Run 'dev-swarm sync-labels --all' to create the workflow labels");
    println!("  3. Run 'dev-swarm start' to begin monitoring");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        execute(Some(&path), false).unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.codebases.len(), 1);
        assert!(config.enabled_codebases().is_empty());
    }

    #[test]
    fn test_init_keeps_existing_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "# mine\n").unwrap();

        execute(Some(&path), false).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine\n");

        execute(Some(&path), true).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("[settings]"));
    }
}
