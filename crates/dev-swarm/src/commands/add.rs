//! Add a codebase to the config file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use colored::Colorize;
use swarm_core::config::{CodebaseConfig, config_file_path, expand_tilde};
use swarm_core::{Config, Error, GhCli, worktree};
use tracing::debug;

const FALLBACK_BRANCH: &str = "main";

pub struct AddArgs<'a> {
    pub repo: &'a str,
    pub path: &'a Path,
    pub branch: Option<&'a str>,
    pub name: Option<&'a str>,
}

pub async fn execute(config_path: Option<&Path>, args: AddArgs<'_>) -> Result<()> {
    let codebase = prepare(&args)?;

    let gh = GhCli::new();
    if !gh.repo_exists(&codebase.repo).await {
        bail!("cannot access repository: {}", codebase.repo);
    }

    let file = config_path.map(Path::to_path_buf).unwrap_or_else(config_file_path);
    let mut config = load_or_default(&file)?;
    insert(&mut config, codebase.clone())?;
    config
        .save(&file)
        .with_context(|| format!("failed to save config to {}", file.display()))?;

    println!(
        "{} Added codebase '{}' ({})",
        "✓".green(),
        codebase.name,
        codebase.repo
    );
    println!("  Path: {}", codebase.local_path.display());
    println!("  Branch: {}", codebase.default_branch);
    println!();
    println!("Run 'dev-swarm sync-labels {}' to create labels in the repository.", codebase.repo);
    Ok(())
}

/// Build the codebase entry from the arguments, checking the local checkout.
fn prepare(args: &AddArgs<'_>) -> Result<CodebaseConfig> {
    let (_, repo_name) = args
        .repo
        .split_once('/')
        .filter(|(owner, name)| !owner.is_empty() && !name.is_empty())
        .with_context(|| format!("repo must be in 'owner/name' format, got '{}'", args.repo))?;

    let local_path = absolute(&expand_tilde(args.path))?;
    if !local_path.exists() {
        bail!("path does not exist: {}", local_path.display());
    }
    if !worktree::is_git_repo(&local_path)? {
        bail!("path is not a git repository: {}", local_path.display());
    }

    let default_branch = match args.branch {
        Some(branch) => branch.to_string(),
        None => worktree::detect_default_branch(&local_path)?.unwrap_or_else(|| {
            debug!("Could not detect default branch, using {}", FALLBACK_BRANCH);
            FALLBACK_BRANCH.to_string()
        }),
    };

    Ok(CodebaseConfig {
        name: args.name.unwrap_or(repo_name).to_string(),
        repo: args.repo.to_string(),
        local_path,
        default_branch,
        enabled: true,
        labels: None,
    })
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

/// The existing config, or defaults when there is no file yet.
fn load_or_default(file: &Path) -> Result<Config> {
    match Config::load(Some(file)) {
        Ok(config) => Ok(config),
        Err(Error::ConfigNotFound(_)) => {
            let mut config = Config::default();
            if let Some(dir) = file.parent() {
                config.config_dir = dir.to_path_buf();
            }
            Ok(config)
        }
        Err(e) => Err(e).with_context(|| format!("failed to load config from {}", file.display())),
    }
}

fn insert(config: &mut Config, codebase: CodebaseConfig) -> Result<()> {
    if config.codebases.iter().any(|cb| cb.repo == codebase.repo) {
        bail!("repository already configured: {}", codebase.repo);
    }
    config.codebases.push(codebase);
    config.validate().context("codebase would make the config invalid")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let git = |args: &[&str]| {
            let status = Command::new("git")
                .arg("-C")
                .arg(dir.path())
                .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
                .args(args)
                .status()
                .unwrap();
            assert!(status.success());
        };
        git(&["init", "-q"]);
        git(&["symbolic-ref", "HEAD", "refs/heads/master"]);
        git(&["commit", "-q", "--allow-empty", "-m", "initial"]);
        dir
    }

    #[test]
    fn test_prepare_detects_branch_and_name() {
        let repo = git_repo();
        let codebase = prepare(&AddArgs {
            repo: "acme/widgets",
            path: repo.path(),
            branch: None,
            name: None,
        })
        .unwrap();
        assert_eq!(codebase.name, "widgets");
        assert_eq!(codebase.default_branch, "master");
        assert_eq!(codebase.local_path, repo.path());
        assert!(codebase.enabled);

        let named = prepare(&AddArgs {
            repo: "acme/widgets",
            path: repo.path(),
            branch: Some("develop"),
            name: Some("w"),
        })
        .unwrap();
        assert_eq!(named.name, "w");
        assert_eq!(named.default_branch, "develop");
    }

    #[test]
    fn test_prepare_rejects_bad_input() {
        let repo = git_repo();
        let plain = tempfile::tempdir().unwrap();
        fn args<'a>(repo: &'a str, path: &'a Path) -> AddArgs<'a> {
            AddArgs {
                repo,
                path,
                branch: None,
                name: None,
            }
        }

        assert!(prepare(&args("widgets", repo.path())).is_err());
        assert!(prepare(&args("acme/", repo.path())).is_err());
        assert!(prepare(&args("acme/widgets", Path::new("/nonexistent/widgets"))).is_err());
        let err = prepare(&args("acme/widgets", plain.path())).unwrap_err();
        assert!(err.to_string().contains("not a git repository"));
    }

    #[test]
    fn test_insert_and_save_round_trip() {
        let repo = git_repo();
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");

        let mut config = load_or_default(&file).unwrap();
        assert_eq!(config.config_dir, dir.path());
        let codebase = prepare(&AddArgs {
            repo: "acme/widgets",
            path: repo.path(),
            branch: None,
            name: None,
        })
        .unwrap();
        insert(&mut config, codebase.clone()).unwrap();
        config.save(&file).unwrap();

        let mut reloaded = load_or_default(&file).unwrap();
        assert_eq!(reloaded.codebases.len(), 1);
        assert_eq!(reloaded.codebases[0].repo, "acme/widgets");
        let err = insert(&mut reloaded, codebase).unwrap_err();
        assert!(err.to_string().contains("already configured"));
    }

    #[test]
    fn test_insert_rejects_unsafe_name() {
        let mut config = Config::default();
        let err = insert(
            &mut config,
            CodebaseConfig {
                name: "../escape".into(),
                repo: "acme/widgets".into(),
                local_path: "/src/widgets".into(),
                default_branch: "main".into(),
                enabled: true,
                labels: None,
            },
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("path separators"));
    }
}
