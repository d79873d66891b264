//! Orchestrator state and the events it publishes.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Codebase;
use crate::session::{OutputEvent, SessionInfo, SessionStatus, StatusEvent};
use crate::tracker::Issue;

/// Process-level state of the reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Stopped,
    Running,
    Paused,
}

/// A timestamped state-change event.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub timestamp: DateTime<Utc>,
    pub event: StateEvent,
}

impl StateUpdate {
    pub fn now(event: StateEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StateEvent {
    IssueFound {
        codebase: String,
        issue: u64,
        label: String,
    },
    IssueRemoved {
        codebase: String,
        issue: u64,
    },
    LabelChanged {
        codebase: String,
        issue: u64,
        from: String,
        to: String,
    },
    SessionStarted {
        codebase: String,
        issue: u64,
        info: SessionInfo,
    },
    SessionOutput(OutputEvent),
    SessionEnded(StatusEvent),
    PollComplete,
    Error {
        codebase: Option<String>,
        message: String,
    },
}

impl StateEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StateEvent::IssueFound { .. } => "issue_found",
            StateEvent::IssueRemoved { .. } => "issue_removed",
            StateEvent::LabelChanged { .. } => "label_changed",
            StateEvent::SessionStarted { .. } => "session_started",
            StateEvent::SessionOutput(_) => "session_output",
            StateEvent::SessionEnded(_) => "session_ended",
            StateEvent::PollComplete => "poll_complete",
            StateEvent::Error { .. } => "error",
        }
    }
}

/// Per-issue tracking entry.
#[derive(Debug, Clone)]
pub(crate) struct IssueState {
    pub issue: Issue,
    pub label: String,
    pub has_session: bool,
    pub session_key: Option<String>,
    pub last_checked: DateTime<Utc>,
}

impl IssueState {
    pub fn new(issue: Issue, label: String) -> Self {
        Self {
            issue,
            label,
            has_session: false,
            session_key: None,
            last_checked: Utc::now(),
        }
    }
}

/// Issue table and health of one codebase.
#[derive(Debug, Clone)]
pub(crate) struct CodebaseState {
    pub codebase: Codebase,
    pub issues: BTreeMap<u64, IssueState>,
    pub last_poll: Option<DateTime<Utc>>,
    pub healthy: bool,
    pub error: Option<String>,
}

impl CodebaseState {
    pub fn new(codebase: Codebase) -> Self {
        Self {
            codebase,
            issues: BTreeMap::new(),
            last_poll: None,
            healthy: true,
            error: None,
        }
    }
}

/// Aggregate numbers for observers.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub active_sessions: usize,
    pub total_sessions: usize,
    pub total_issues: usize,
    pub last_poll: Option<DateTime<Utc>>,
    pub next_poll: Option<DateTime<Utc>>,
    pub paused: bool,
    pub uptime: Option<Duration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssueInfo {
    pub number: u64,
    pub title: String,
    pub label: String,
    pub has_session: bool,
    pub session_key: Option<String>,
    pub status: Option<SessionStatus>,
    pub duration: Option<Duration>,
    pub codebase: String,
    pub repo: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodebaseInfo {
    pub name: String,
    pub repo: String,
    pub issues: Vec<IssueInfo>,
    pub idle: bool,
    pub healthy: bool,
    pub error: Option<String>,
    pub last_poll: Option<DateTime<Utc>>,
}
