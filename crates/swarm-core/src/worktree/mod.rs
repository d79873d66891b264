//! Git worktree management.
//!
//! Every issue gets its own worktree on a deterministic branch:
//! - Path: `{root}/{codebase}/issue-{n}`
//! - Branch: `agent/issue-{n}`
//!
//! The functions here are blocking wrappers around `git -C <repo>`;
//! [`GitWorkspaces`] adapts them for async callers.

mod provider;

pub use provider::{GitWorkspaces, WorkspaceProvider};

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info, warn};

/// Prefix of every managed branch.
pub const BRANCH_PREFIX: &str = "agent/issue-";

/// Workspace directory for an issue
pub fn worktree_path(root: &Path, codebase: &str, issue: u64) -> PathBuf {
    root.join(codebase).join(format!("issue-{}", issue))
}

/// Managed branch name for an issue
pub fn branch_name(issue: u64) -> String {
    format!("{}{}", BRANCH_PREFIX, issue)
}

/// Issue number of a managed branch, `None` for anything else
pub fn issue_from_branch(branch: &str) -> Option<u64> {
    branch.strip_prefix(BRANCH_PREFIX)?.parse().ok()
}

fn git(repo_path: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo_path)
        .args(args)
        .output()?;
    Ok(output)
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Check if a directory is a git repository
pub fn is_git_repo(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    Ok(git(path, &["rev-parse", "--git-dir"])?.status.success())
}

/// Get the current branch name of a checkout
pub fn get_current_branch(path: &Path) -> Result<Option<String>> {
    let output = git(path, &["rev-parse", "--abbrev-ref", "HEAD"])?;
    if !output.status.success() {
        return Ok(None);
    }

    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if branch.is_empty() || branch == "HEAD" {
        Ok(None) // Detached HEAD state
    } else {
        Ok(Some(branch))
    }
}

/// Default branch of a checkout: `origin/HEAD` when set, else `main` or `master`.
pub fn detect_default_branch(path: &Path) -> Result<Option<String>> {
    let output = git(path, &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"])?;
    if output.status.success() {
        let head = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let branch = head.strip_prefix("origin/").unwrap_or(&head);
        if !branch.is_empty() {
            return Ok(Some(branch.to_string()));
        }
    }

    for candidate in ["main", "master"] {
        if branch_exists(path, candidate)? {
            return Ok(Some(candidate.to_string()));
        }
    }
    Ok(None)
}

/// Whether a local branch exists
pub fn branch_exists(repo_path: &Path, branch: &str) -> Result<bool> {
    let reference = format!("refs/heads/{}", branch);
    Ok(git(repo_path, &["rev-parse", "--verify", "--quiet", &reference])?
        .status
        .success())
}

/// Whether `origin/<branch>` is known locally
pub fn remote_branch_exists(repo_path: &Path, branch: &str) -> Result<bool> {
    let reference = format!("refs/remotes/origin/{}", branch);
    Ok(git(repo_path, &["rev-parse", "--verify", "--quiet", &reference])?
        .status
        .success())
}

/// Fetch one branch from origin. Returns false when the fetch failed.
pub fn fetch_branch(repo_path: &Path, branch: &str) -> Result<bool> {
    let output = git(repo_path, &["fetch", "origin", branch])?;
    if !output.status.success() {
        debug!("Could not fetch {} from origin: {}", branch, stderr_of(&output));
        return Ok(false);
    }
    Ok(true)
}

/// Create a worktree for `branch` at `worktree_path`.
///
/// An existing local branch is checked out as is, an existing remote branch
/// is tracked, otherwise the branch is created from `origin/<base>` (or the
/// local `<base>` when the remote ref is missing).
pub fn create_worktree(
    repo_path: &Path,
    worktree_path: &Path,
    branch: &str,
    base_branch: &str,
) -> Result<PathBuf> {
    if !is_git_repo(repo_path)? {
        return Err(Error::NotGitRepo(repo_path.to_string_lossy().to_string()));
    }

    if worktree_path.exists() {
        return Err(Error::Worktree(format!(
            "path already exists: {}",
            worktree_path.display()
        )));
    }

    if let Some(parent) = worktree_path.parent() {
        fs::create_dir_all(parent)?;
    }

    if let Err(e) = fetch_branch(repo_path, base_branch) {
        warn!("Failed to run git fetch for {}: {}", base_branch, e);
    }

    let target = worktree_path.to_string_lossy().to_string();
    let output = if branch_exists(repo_path, branch)? {
        git(repo_path, &["worktree", "add", &target, branch])?
    } else if remote_branch_exists(repo_path, branch)? {
        let remote_ref = format!("origin/{}", branch);
        git(
            repo_path,
            &["worktree", "add", "--track", "-b", branch, &target, &remote_ref],
        )?
    } else {
        let remote_base = format!("origin/{}", base_branch);
        let start_point = if remote_branch_exists(repo_path, base_branch)? {
            remote_base
        } else {
            base_branch.to_string()
        };
        git(
            repo_path,
            &["worktree", "add", "-b", branch, &target, &start_point],
        )?
    };

    if !output.status.success() {
        let stderr = stderr_of(&output);
        if stderr.contains("already checked out") || stderr.contains("already used by worktree") {
            return Err(Error::Worktree(format!("branch {} is in use: {}", branch, stderr)));
        }
        return Err(Error::Worktree(stderr));
    }

    info!("Created worktree at {:?} for branch {}", worktree_path, branch);
    Ok(worktree_path.to_path_buf())
}

/// Whether a workspace directory exists
pub fn worktree_exists(worktree_path: &Path) -> bool {
    worktree_path.is_dir()
}

/// Remove a worktree, falling back to deleting the directory, then prune.
///
/// With `delete_branch` the worktree's branch is deleted from `repo_path` as well.
/// Branch deletion and pruning are best-effort.
pub fn remove_worktree(repo_path: &Path, worktree_path: &Path, delete_branch_after: bool) -> Result<()> {
    let branch = if delete_branch_after && worktree_path.exists() {
        get_current_branch(worktree_path).unwrap_or(None)
    } else {
        None
    };

    if worktree_path.exists() {
        let target = worktree_path.to_string_lossy().to_string();
        let output = git(repo_path, &["worktree", "remove", "--force", &target])?;
        if !output.status.success() {
            warn!(
                "git worktree remove failed for {:?}, deleting directory: {}",
                worktree_path,
                stderr_of(&output)
            );
            if worktree_path.exists() {
                fs::remove_dir_all(worktree_path)?;
            }
        }
    }

    if let Err(e) = prune_worktrees(repo_path) {
        debug!("Prune after removal failed: {}", e);
    }

    if let Some(branch) = branch {
        if let Err(e) = delete_branch(repo_path, &branch, true) {
            warn!("Failed to delete branch {}: {}", branch, e);
        }
    }

    info!("Removed worktree at {:?}", worktree_path);
    Ok(())
}

/// Delete a branch from a repository.
///
/// # Returns
/// * `Ok(true)` - Branch was deleted
/// * `Ok(false)` - Branch did not exist
/// * `Err` - If deletion fails for other reasons
pub fn delete_branch(repo_path: &Path, branch: &str, force: bool) -> Result<bool> {
    let flag = if force { "-D" } else { "-d" };
    let output = git(repo_path, &["branch", flag, branch])?;

    if output.status.success() {
        info!("Deleted branch {} from {:?}", branch, repo_path);
        return Ok(true);
    }

    let stderr = stderr_of(&output);
    if stderr.contains("not found") {
        debug!("Branch {} not found in {:?}", branch, repo_path);
        return Ok(false);
    }

    Err(Error::command_failed(format!("git branch {} {}", flag, branch), stderr))
}

/// Prune stale worktree entries from git.
pub fn prune_worktrees(repo_path: &Path) -> Result<()> {
    let output = git(repo_path, &["worktree", "prune"])?;
    if !output.status.success() {
        return Err(Error::command_failed("git worktree prune", stderr_of(&output)));
    }
    Ok(())
}

/// List all worktrees for a repository
pub fn list_worktrees(repo_path: &Path) -> Result<Vec<WorktreeEntry>> {
    let output = git(repo_path, &["worktree", "list", "--porcelain"])?;
    if !output.status.success() {
        return Err(Error::Worktree(format!(
            "Failed to list worktrees: {}",
            stderr_of(&output)
        )));
    }

    Ok(parse_worktree_list(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_worktree_list(porcelain: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in porcelain.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                branch: None,
            });
        } else if let Some(ref mut entry) = current {
            if let Some(branch) = line.strip_prefix("branch ") {
                let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);
                entry.branch = Some(branch.to_string());
            }
        }
    }

    if let Some(entry) = current {
        entries.push(entry);
    }
    entries
}

/// Drop worktree registrations under `managed_root` whose directory is gone.
///
/// Returns the number of registrations cleaned up.
pub fn cleanup_orphaned(repo_path: &Path, managed_root: &Path) -> Result<usize> {
    let orphaned: Vec<WorktreeEntry> = list_worktrees(repo_path)?
        .into_iter()
        .filter(|wt| wt.path.starts_with(managed_root) && !worktree_exists(&wt.path))
        .collect();

    for wt in &orphaned {
        remove_worktree(repo_path, &wt.path, false)?;
    }
    Ok(orphaned.len())
}

/// Entry from `git worktree list`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub branch: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
            .args(args)
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    fn init_repo(dir: &Path) {
        run_git(dir, &["init", "-q"]);
        run_git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        fs::write(dir.join("README.md"), "widgets\n").unwrap();
        run_git(dir, &["add", "README.md"]);
        run_git(dir, &["commit", "-q", "-m", "initial"]);
    }

    #[test]
    fn test_naming() {
        let root = Path::new("/tmp/wt");
        assert_eq!(worktree_path(root, "widgets", 7), PathBuf::from("/tmp/wt/widgets/issue-7"));
        assert_eq!(branch_name(7), "agent/issue-7");
        assert_eq!(issue_from_branch("agent/issue-7"), Some(7));
        assert_eq!(issue_from_branch("agent/issue-x"), None);
        assert_eq!(issue_from_branch("feature/issue-7"), None);
    }

    #[test]
    fn test_parse_worktree_list() {
        let porcelain = "worktree /src/widgets\nHEAD abc\nbranch refs/heads/main\n\nworktree /wt/widgets/issue-7\nHEAD def\nbranch refs/heads/agent/issue-7\n\nworktree /wt/detached\nHEAD 123\ndetached\n";
        let entries = parse_worktree_list(porcelain);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].branch.as_deref(), Some("agent/issue-7"));
        assert_eq!(entries[2].branch, None);
    }

    #[test]
    fn test_create_and_remove_worktree() {
        let repo = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        init_repo(repo.path());

        let path = worktree_path(root.path(), "widgets", 7);
        let branch = branch_name(7);
        create_worktree(repo.path(), &path, &branch, "main").unwrap();
        assert!(worktree_exists(&path));
        assert!(branch_exists(repo.path(), &branch).unwrap());
        assert_eq!(get_current_branch(&path).unwrap().as_deref(), Some("agent/issue-7"));

        // Existing path is refused
        assert!(create_worktree(repo.path(), &path, &branch, "main").is_err());

        remove_worktree(repo.path(), &path, true).unwrap();
        assert!(!worktree_exists(&path));
        assert!(!branch_exists(repo.path(), &branch).unwrap());
    }

    #[test]
    fn test_existing_branch_is_reused() {
        let repo = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        init_repo(repo.path());
        run_git(repo.path(), &["branch", "agent/issue-3"]);

        let path = worktree_path(root.path(), "widgets", 3);
        create_worktree(repo.path(), &path, "agent/issue-3", "main").unwrap();
        assert_eq!(get_current_branch(&path).unwrap().as_deref(), Some("agent/issue-3"));
        remove_worktree(repo.path(), &path, false).unwrap();
        assert!(branch_exists(repo.path(), "agent/issue-3").unwrap());
    }

    #[test]
    fn test_unreachable_origin_falls_back_to_local_base() {
        let repo = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        init_repo(repo.path());
        run_git(repo.path(), &["remote", "add", "origin", "/nonexistent/widgets.git"]);
        assert!(!fetch_branch(repo.path(), "main").unwrap());

        let path = worktree_path(root.path(), "widgets", 9);
        create_worktree(repo.path(), &path, "agent/issue-9", "main").unwrap();

        let head = |dir: &Path| {
            let out = git(dir, &["rev-parse", "HEAD"]).unwrap();
            String::from_utf8_lossy(&out.stdout).trim().to_string()
        };
        assert_eq!(head(&path), head(repo.path()));
        remove_worktree(repo.path(), &path, true).unwrap();
    }

    #[test]
    fn test_detect_default_branch() {
        let repo = tempfile::tempdir().unwrap();
        init_repo(repo.path());
        assert_eq!(detect_default_branch(repo.path()).unwrap().as_deref(), Some("main"));

        run_git(repo.path(), &["branch", "-m", "main", "trunk"]);
        assert_eq!(detect_default_branch(repo.path()).unwrap(), None);

        run_git(repo.path(), &["update-ref", "refs/remotes/origin/trunk", "HEAD"]);
        run_git(
            repo.path(),
            &["symbolic-ref", "refs/remotes/origin/HEAD", "refs/remotes/origin/trunk"],
        );
        assert_eq!(detect_default_branch(repo.path()).unwrap().as_deref(), Some("trunk"));
    }

    #[test]
    fn test_not_a_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_git_repo(dir.path()).unwrap());
        let err = create_worktree(dir.path(), &dir.path().join("wt"), "agent/issue-1", "main")
            .unwrap_err();
        assert!(matches!(err, Error::NotGitRepo(_)));
    }
}
