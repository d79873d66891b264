//! Push label definitions to repositories.

use std::path::Path;

use anyhow::{Result, bail};
use colored::Colorize;
use swarm_core::tracker::LabelInfo;
use swarm_core::{Config, GhCli, IssueTracker};

/// Repositories to sync with the labels each should get.
fn targets(config: &Config, repo: Option<&str>, all: bool) -> Result<Vec<(String, Vec<LabelInfo>)>> {
    let infos = |labels: &swarm_core::LabelSet| labels.iter().map(LabelInfo::from).collect::<Vec<_>>();

    if all {
        return Ok(config
            .enabled_codebases()
            .iter()
            .map(|cb| (cb.repo.clone(), infos(&cb.labels)))
            .collect());
    }

    match repo {
        Some(repo) => {
            // A configured repo gets its own overrides; anything else the global set.
            let labels = config
                .codebase_by_repo(repo)
                .map(|cb| cb.labels)
                .unwrap_or_else(|| config.global_labels());
            Ok(vec![(repo.to_string(), infos(&labels))])
        }
        None => bail!("specify a repository or use --all"),
    }
}

pub async fn execute(config_path: Option<&Path>, repo: Option<&str>, all: bool) -> Result<()> {
    let config = super::load_config(config_path)?;
    let targets = targets(&config, repo, all)?;
    if targets.is_empty() {
        println!("No enabled codebases to sync.");
        return Ok(());
    }

    let gh = GhCli::new();
    for (repo, labels) in targets {
        println!("Syncing labels for {}...", repo.bold());
        match gh.sync_labels(&repo, &labels).await {
            Ok(()) => println!("  {} Created/updated {} labels", "✓".green(), labels.len()),
            Err(e) => println!("  {} {}", "✗".red(), e),
        }
    }
    Ok(())
}
