//! Admission-controlled pool of worker sessions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use super::prompt::{PROMPT_FILE_NAME, PromptContext, build_prompt};
use super::types::{OutputEvent, SessionInfo, SessionStatus, SpawnRequest, StatusEvent};
use super::worker::WorkerSession;
use crate::config::{AgentCommand, Config};
use crate::error::{Error, Result};
use crate::worktree::{self, WorkspaceProvider};

/// Live-tail output channel capacity.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 1000;
/// Terminal status channel capacity.
pub const STATUS_CHANNEL_CAPACITY: usize = 100;

/// Receiving ends of the session event channels.
#[derive(Debug)]
pub struct SessionEvents {
    pub output: mpsc::Receiver<OutputEvent>,
    pub status: mpsc::Receiver<StatusEvent>,
}

/// Session settings taken from the configuration.
#[derive(Debug, Clone)]
struct LaunchSettings {
    max_sessions: usize,
    output_lines: usize,
    max_prompt_comments: usize,
    approval_keywords: Vec<String>,
    general_instructions: String,
    agent: AgentCommand,
    worktrees_root: PathBuf,
}

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<WorkerSession>>>,
    settings: LaunchSettings,
    workspaces: Arc<dyn WorkspaceProvider>,
    output_tx: mpsc::Sender<OutputEvent>,
    status_tx: mpsc::Sender<StatusEvent>,
}

impl SessionManager {
    pub fn new(config: &Config, workspaces: Arc<dyn WorkspaceProvider>) -> (Self, SessionEvents) {
        let (output_tx, output) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let (status_tx, status) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
        let settings = LaunchSettings {
            max_sessions: config.settings.max_concurrent_sessions,
            output_lines: config.settings.output_buffer_lines,
            max_prompt_comments: config.settings.max_prompt_comments,
            approval_keywords: config.settings.approval_keywords.clone(),
            general_instructions: config.instructions.general.clone(),
            agent: config.settings.agent.clone(),
            worktrees_root: config.worktrees_root(),
        };

        let manager = Self {
            sessions: RwLock::new(HashMap::new()),
            settings,
            workspaces,
            output_tx,
            status_tx,
        };
        (manager, SessionEvents { output, status })
    }

    pub fn max_sessions(&self) -> usize {
        self.settings.max_sessions
    }

    /// True while fewer than the ceiling are `running`.
    pub async fn can_spawn(&self) -> bool {
        self.active_count().await < self.settings.max_sessions
    }

    /// Whether any session, in any status, exists for `key`.
    pub async fn has_session(&self, key: &str) -> bool {
        self.sessions.read().await.contains_key(key)
    }

    /// Number of `running` sessions.
    pub async fn active_count(&self) -> usize {
        running(&*self.sessions.read().await)
    }

    pub async fn total_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Create the workspace, write the prompt and launch the agent for an issue.
    ///
    /// The session is registered before any of that happens so a concurrent
    /// caller sees it immediately; on failure it is deregistered again.
    pub async fn spawn_session(&self, request: SpawnRequest) -> Result<Arc<WorkerSession>> {
        let key = request.key();
        let number = request.issue.number;
        let workspace =
            worktree::worktree_path(&self.settings.worktrees_root, &request.codebase.name, number);
        let branch = worktree::branch_name(number);

        let session = {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(&key) {
                return Err(Error::SessionExists(key));
            }
            if running(&sessions) >= self.settings.max_sessions {
                return Err(Error::MaxSessionsReached);
            }

            let session = Arc::new(WorkerSession::new(
                key.clone(),
                request.codebase.clone(),
                request.issue.clone(),
                request.label.clone(),
                workspace,
                branch,
                self.settings.output_lines,
            ));
            sessions.insert(key.clone(), Arc::clone(&session));
            session
        };

        match self.launch(&session, &request).await {
            Ok(()) => {
                info!(
                    session = %key,
                    label = %request.label.name,
                    workspace = ?session.workspace(),
                    "Session started"
                );
                Ok(session)
            }
            Err(e) => {
                self.sessions.write().await.remove(&key);
                warn!(session = %key, "Session launch failed: {}", e);
                Err(e)
            }
        }
    }

    async fn launch(&self, session: &Arc<WorkerSession>, request: &SpawnRequest) -> Result<()> {
        self.workspaces
            .ensure(&request.codebase, session.workspace(), session.branch())
            .await?;

        let prompt = build_prompt(&PromptContext {
            codebase: &request.codebase,
            issue: &request.issue,
            label: &request.label,
            branch: session.branch(),
            workspace: session.workspace(),
            general_instructions: &self.settings.general_instructions,
            approval_keywords: &self.settings.approval_keywords,
            max_comments: self.settings.max_prompt_comments,
        });
        let prompt_file = session.workspace().join(PROMPT_FILE_NAME);
        tokio::fs::write(&prompt_file, prompt).await?;

        session.start(
            &self.settings.agent,
            &prompt_file,
            self.output_tx.clone(),
            self.status_tx.clone(),
        )
    }

    pub async fn get(&self, key: &str) -> Option<Arc<WorkerSession>> {
        self.sessions.read().await.get(key).cloned()
    }

    pub async fn all(&self) -> Vec<Arc<WorkerSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn infos(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .read()
            .await
            .values()
            .map(|s| s.info())
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    /// Drop a session from the table without stopping it.
    pub async fn remove(&self, key: &str) -> Option<Arc<WorkerSession>> {
        self.sessions.write().await.remove(key)
    }

    pub async fn stop(&self, key: &str) -> Result<()> {
        match self.get(key).await {
            Some(session) => {
                session.stop();
                Ok(())
            }
            None => Err(Error::Other(format!("no session for {}", key))),
        }
    }

    pub async fn stop_all(&self) {
        let sessions = self.all().await;
        if !sessions.is_empty() {
            info!("Stopping {} session(s)", sessions.len());
        }
        for session in sessions {
            session.stop();
        }
    }

    /// Remove and return every session in a terminal status.
    pub async fn cleanup_completed(&self) -> Vec<Arc<WorkerSession>> {
        let mut sessions = self.sessions.write().await;
        let finished: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.status().is_terminal())
            .map(|(k, _)| k.clone())
            .collect();

        finished
            .into_iter()
            .filter_map(|key| {
                debug!(session = %key, "Draining finished session");
                sessions.remove(&key)
            })
            .collect()
    }

    #[cfg(any(test, feature = "test-support"))]
    #[doc(hidden)]
    pub async fn register(&self, session: Arc<WorkerSession>) {
        self.sessions
            .write()
            .await
            .insert(session.key().to_string(), session);
    }
}

fn running(sessions: &HashMap<String, Arc<WorkerSession>>) -> usize {
    sessions
        .values()
        .filter(|s| s.status() == SessionStatus::Running)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelRole;
    use crate::session::types::session_key;
    use crate::testing::{FakeWorkspaces, sample_codebase, sample_issue, test_config};
    use std::time::Duration;

    fn manager(dir: &std::path::Path, max: usize, agent: AgentCommand) -> (SessionManager, SessionEvents, Arc<FakeWorkspaces>) {
        let mut config = test_config(dir);
        config.settings.max_concurrent_sessions = max;
        config.settings.agent = agent;
        let workspaces = Arc::new(FakeWorkspaces::default());
        let (manager, events) = SessionManager::new(&config, workspaces.clone());
        (manager, events, workspaces)
    }

    fn sh(script: &str) -> AgentCommand {
        AgentCommand {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
        }
    }

    fn request(n: u64) -> SpawnRequest {
        let codebase = sample_codebase("/src/widgets");
        let label = codebase.labels.by_role(LabelRole::ReadyToPlan).unwrap().clone();
        SpawnRequest {
            codebase,
            issue: sample_issue(n, &["user:ready-to-plan"]),
            label,
        }
    }

    fn bare_session(n: u64) -> Arc<WorkerSession> {
        let req = request(n);
        Arc::new(WorkerSession::new(
            session_key(&req.codebase.repo, n),
            req.codebase,
            req.issue,
            req.label,
            PathBuf::from(format!("/tmp/issue-{}", n)),
            worktree::branch_name(n),
            10,
        ))
    }

    #[tokio::test]
    async fn test_duplicate_key_refused_in_any_status() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _events, _ws) = manager(dir.path(), 5, sh("exit 0"));

        for status in [
            SessionStatus::Pending,
            SessionStatus::Running,
            SessionStatus::Completed,
            SessionStatus::Failed,
        ] {
            let existing = bare_session(7);
            existing.force_status(status);
            manager.register(existing).await;

            let err = manager.spawn_session(request(7)).await.unwrap_err();
            assert!(matches!(err, Error::SessionExists(ref k) if k == "acme/widgets#7"));
            manager.remove("acme/widgets#7").await;
        }
    }

    #[tokio::test]
    async fn test_admission_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _events, _ws) = manager(dir.path(), 2, sh("exit 0"));

        let a = bare_session(1);
        let b = bare_session(2);
        let pending = bare_session(3);
        a.force_status(SessionStatus::Running);
        b.force_status(SessionStatus::Running);
        manager.register(a.clone()).await;
        manager.register(b).await;
        manager.register(pending).await;

        assert!(!manager.can_spawn().await);
        assert!(matches!(
            manager.spawn_session(request(4)).await,
            Err(Error::MaxSessionsReached)
        ));

        a.force_status(SessionStatus::Completed);
        assert!(manager.can_spawn().await);
        assert_eq!(manager.active_count().await, 1);
        assert_eq!(manager.total_count().await, 3);
    }

    #[tokio::test]
    async fn test_spawn_runs_agent_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, mut events, workspaces) =
            manager(dir.path(), 5, sh("cat .dev-swarm-prompt.md | head -1; pwd"));

        let session = manager.spawn_session(request(7)).await.unwrap();
        let expected = dir.path().join("worktrees").join("widgets").join("issue-7");
        assert_eq!(session.workspace(), expected);
        assert_eq!(session.branch(), "agent/issue-7");
        assert!(manager.has_session("acme/widgets#7").await);
        assert_eq!(workspaces.ensured(), vec![expected.clone()]);

        let status = tokio::time::timeout(Duration::from_secs(10), events.status.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status.status, SessionStatus::Completed);

        let texts: Vec<String> = session.output().into_iter().map(|l| l.text).collect();
        assert_eq!(texts[0], "# dev-swarm Task");
        assert!(texts[1].ends_with("issue-7"));

        let drained = manager.cleanup_completed().await;
        assert_eq!(drained.len(), 1);
        assert!(!manager.has_session("acme/widgets#7").await);
    }

    #[tokio::test]
    async fn test_launch_failure_deregisters() {
        let dir = tempfile::tempdir().unwrap();
        let agent = AgentCommand {
            program: "/nonexistent/agent-binary".into(),
            args: vec![],
        };
        let (manager, _events, _ws) = manager(dir.path(), 5, agent);

        let err = manager.spawn_session(request(9)).await.unwrap_err();
        assert!(matches!(err, Error::Launch { .. }));
        assert!(!err.is_fatal());
        assert!(!manager.has_session("acme/widgets#9").await);
    }

    #[tokio::test]
    async fn test_workspace_failure_deregisters() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _events, workspaces) = manager(dir.path(), 5, sh("exit 0"));
        workspaces.fail_ensure(true);

        assert!(manager.spawn_session(request(9)).await.is_err());
        assert!(!manager.has_session("acme/widgets#9").await);
    }

    #[tokio::test]
    async fn test_stop_all() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _events, _ws) = manager(dir.path(), 5, sh("sleep 30"));
        manager.spawn_session(request(1)).await.unwrap();
        manager.spawn_session(request(2)).await.unwrap();
        assert_eq!(manager.active_count().await, 2);

        manager.stop_all().await;
        for _ in 0..200 {
            if manager.active_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(manager.active_count().await, 0);
        assert_eq!(manager.cleanup_completed().await.len(), 2);
        assert!(manager.stop("acme/widgets#1").await.is_err());
    }
}
