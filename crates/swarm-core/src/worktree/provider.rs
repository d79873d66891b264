//! Async workspace lifecycle used by the session manager and the reconciliation loop.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::config::Codebase;
use crate::error::{Error, Result};

/// Creates and destroys isolated per-issue workspaces.
#[async_trait]
pub trait WorkspaceProvider: Send + Sync {
    /// Whether a workspace directory exists at `path`.
    async fn exists(&self, path: &Path) -> bool;

    /// Create the workspace for `branch` at `path` if it is absent.
    async fn ensure(&self, codebase: &Codebase, path: &Path, branch: &str) -> Result<()>;

    /// Remove the workspace at `path`, optionally deleting its branch.
    async fn remove(&self, codebase: &Codebase, path: &Path, delete_branch: bool) -> Result<()>;
}

/// Git worktrees branched from each codebase's local checkout.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitWorkspaces;

impl GitWorkspaces {
    pub fn new() -> Self {
        Self
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Worktree(format!("worktree task failed: {}", e)))?
}

#[async_trait]
impl WorkspaceProvider for GitWorkspaces {
    async fn exists(&self, path: &Path) -> bool {
        super::worktree_exists(path)
    }

    async fn ensure(&self, codebase: &Codebase, path: &Path, branch: &str) -> Result<()> {
        if super::worktree_exists(path) {
            debug!("Reusing worktree at {:?}", path);
            return Ok(());
        }

        let repo: PathBuf = codebase.local_path.clone();
        let target = path.to_path_buf();
        let branch = branch.to_string();
        let base = codebase.default_branch.clone();
        blocking(move || super::create_worktree(&repo, &target, &branch, &base).map(|_| ())).await
    }

    async fn remove(&self, codebase: &Codebase, path: &Path, delete_branch: bool) -> Result<()> {
        let repo = codebase.local_path.clone();
        let target = path.to_path_buf();
        blocking(move || super::remove_worktree(&repo, &target, delete_branch)).await
    }
}
