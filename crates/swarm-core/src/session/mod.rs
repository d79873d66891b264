//! Agent worker sessions.
//!
//! ## Lifecycle
//!
//! ```text
//! spawn_session
//!   │
//!   ├─► register `pending` under {repo}#{issue}
//!   ├─► ensure workspace {root}/{codebase}/issue-{n} on agent/issue-{n}
//!   ├─► write .dev-swarm-prompt.md
//!   └─► launch agent ──► `running`
//!                          │
//!                          ├─► stdout/stderr readers ──► ring buffer + output channel
//!                          └─► exit watcher ──► `completed` / `failed` + status channel
//!
//! reconciliation tick
//!   └─► cleanup_completed drains terminal sessions from the table
//! ```

mod manager;
mod output;
mod prompt;
mod types;
mod worker;

pub use manager::{
    OUTPUT_CHANNEL_CAPACITY, STATUS_CHANNEL_CAPACITY, SessionEvents, SessionManager,
};
pub use output::OutputBuffer;
pub use prompt::{
    AGENT_MARKER_END, AGENT_MARKER_START, PROMPT_FILE_NAME, PromptContext, build_prompt,
    is_agent_comment, strip_agent_markers, wrap_agent_comment,
};
pub use types::{
    OutputEvent, OutputLine, OutputStream, SessionInfo, SessionStatus, SpawnRequest, StatusEvent,
    session_key,
};
pub use worker::WorkerSession;
