//! swarm-core - Core library for dev-swarm
//!
//! This crate turns a labeled issue tracker into a control plane for a bounded
//! pool of coding-agent workers:
//!
//! - **config**: TOML configuration, defaults and validation
//! - **labels**: The label state space and pickup rules
//! - **tracker**: Issue tracker interface and the `gh` CLI client
//! - **worktree**: Git worktree operations and per-issue workspaces
//! - **lock**: Single-instance process lock
//! - **session**: Agent worker sessions and the admission-controlled manager
//! - **orchestrator**: The reconciliation loop

pub mod config;
pub mod error;
pub mod labels;
pub mod lock;
pub mod orchestrator;
pub mod session;
pub mod tracker;
pub mod worktree;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Re-export commonly used types
pub use config::{Codebase, Config};
pub use error::{Error, Result};
pub use labels::{LabelDefinition, LabelRole, LabelSet, PickupRule};
pub use lock::ProcessLock;
pub use orchestrator::Orchestrator;
pub use session::{SessionManager, SessionStatus, WorkerSession};
pub use tracker::{GhCli, IssueTracker};
pub use worktree::{GitWorkspaces, WorkspaceProvider};
