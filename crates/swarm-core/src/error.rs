//! Error types for swarm-core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using swarm-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for dev-swarm operations
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("config error: {field}: {message}")]
    Config { field: String, message: String },

    #[error("Config file not found: {0}. Run `dev-swarm init` to create one.")]
    ConfigNotFound(PathBuf),

    #[error("Config file is invalid: {0}")]
    ConfigParse(String),

    // Lock errors
    #[error("dev-swarm is already running (PID: {pid})")]
    AlreadyHeld { pid: u32 },

    #[error("Lock is owned by another process (owner PID: {owner}, caller PID: {caller})")]
    NotOwner { owner: u32, caller: u32 },

    #[error("dev-swarm is not running")]
    NotRunning,

    // Orchestrator errors
    #[error("Orchestrator is already running")]
    AlreadyRunning,

    // Session errors
    #[error("Session already exists for {0}")]
    SessionExists(String),

    #[error("Maximum concurrent sessions reached")]
    MaxSessionsReached,

    #[error("Failed to launch agent for {key}: {message}")]
    Launch { key: String, message: String },

    // Tracker errors
    #[error("tracker error: {operation} on {repo}: {message}")]
    Tracker {
        operation: String,
        repo: String,
        message: String,
    },

    // Git/Worktree errors
    #[error("Not a git repository: {0}")]
    NotGitRepo(String),

    #[error("Worktree error: {0}")]
    Worktree(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Command execution errors
    #[error("Command failed: {cmd}\n{stderr}")]
    CommandFailed { cmd: String, stderr: String },

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration validation error
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an error from a command failure
    pub fn command_failed(cmd: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandFailed {
            cmd: cmd.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a tracker error for an operation against a repository
    pub fn tracker(
        operation: impl Into<String>,
        repo: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Tracker {
            operation: operation.into(),
            repo: repo.into(),
            message: message.into(),
        }
    }

    /// Configuration and lock-contention errors end the requesting operation.
    /// Everything else is contained within the poll tick that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::ConfigNotFound(_)
                | Self::ConfigParse(_)
                | Self::AlreadyHeld { .. }
                | Self::NotOwner { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::ConfigParse(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
