//! Remove workspaces nothing will ever pick up again.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use swarm_core::Config;
use swarm_core::worktree;
use tracing::warn;

pub fn execute(config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path)?;
    let root = config.worktrees_root();
    if !root.exists() {
        println!("No worktrees directory found. Nothing to clean up.");
        return Ok(());
    }

    let removed = cleanup(&config, &root)?;
    if removed == 0 {
        println!("No orphaned worktrees found.");
    } else {
        println!("{} Cleaned up {} orphaned worktree(s).", "✓".green(), removed);
    }
    Ok(())
}

/// Delete `issue-*` directories whose codebase is no longer configured or
/// which are no longer git checkouts, then prune stale registrations.
fn cleanup(config: &Config, root: &Path) -> Result<usize> {
    let mut removed = 0;

    let entries = fs::read_dir(root)
        .with_context(|| format!("failed to read {}", root.display()))?;
    for entry in entries.flatten() {
        let codebase_dir = entry.path();
        if !codebase_dir.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let codebase = config.codebase_by_name(&name);

        let Ok(issues) = fs::read_dir(&codebase_dir) else {
            continue;
        };
        for issue in issues.flatten() {
            let path = issue.path();
            let is_workspace = issue.file_name().to_string_lossy().starts_with("issue-");
            if !path.is_dir() || !is_workspace {
                continue;
            }

            let orphaned = codebase.is_none() || !worktree::is_git_repo(&path).unwrap_or(false);
            if orphaned {
                println!("Removing orphaned worktree: {}", path.display());
                fs::remove_dir_all(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                removed += 1;
            }
        }

        if let Some(cb) = codebase {
            if let Err(e) = worktree::cleanup_orphaned(&cb.local_path, &codebase_dir) {
                warn!(codebase = %cb.name, "Failed to prune worktree registrations: {}", e);
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::config::CodebaseConfig;

    #[test]
    fn test_removes_unconfigured_and_broken_workspaces() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("worktrees");
        let gone = root.join("retired").join("issue-1");
        let broken = root.join("widgets").join("issue-2");
        let unrelated = root.join("widgets").join("notes");
        for path in [&gone, &broken, &unrelated] {
            fs::create_dir_all(path).unwrap();
        }

        let mut config = Config::default();
        config.config_dir = dir.path().to_path_buf();
        config.codebases.push(CodebaseConfig {
            name: "widgets".into(),
            repo: "acme/widgets".into(),
            local_path: dir.path().join("missing-checkout"),
            default_branch: "main".into(),
            enabled: true,
            labels: None,
        });

        assert_eq!(cleanup(&config, &root).unwrap(), 2);
        assert!(!gone.exists());
        assert!(!broken.exists());
        assert!(unrelated.exists());
    }
}
