//! Session data types shared by the manager, the worker and observers.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Codebase;
use crate::labels::LabelDefinition;
use crate::tracker::Issue;

/// Global uniqueness key of a session: `{repo}#{issue}`.
pub fn session_key(repo: &str, issue: u64) -> String {
    format!("{}#{}", repo, issue)
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    /// Completed or failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One captured line of agent output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub stream: OutputStream,
}

impl OutputLine {
    pub fn new(text: impl Into<String>, stream: OutputStream) -> Self {
        Self {
            timestamp: Utc::now(),
            text: text.into(),
            stream,
        }
    }
}

/// Live-tail event for one output line.
#[derive(Debug, Clone)]
pub struct OutputEvent {
    pub key: String,
    pub line: OutputLine,
}

/// Emitted when a session reaches a terminal status.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub key: String,
    pub status: SessionStatus,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

/// What the reconciliation loop asks the manager to run.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub codebase: Codebase,
    pub issue: Issue,
    pub label: LabelDefinition,
}

impl SpawnRequest {
    pub fn key(&self) -> String {
        session_key(&self.codebase.repo, self.issue.number)
    }
}

/// Point-in-time view of a session for observers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub key: String,
    pub issue_number: u64,
    pub issue_title: String,
    pub repo: String,
    pub codebase: String,
    pub branch: String,
    pub workspace: PathBuf,
    pub label: String,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}
