//! One run of the coding agent bound to one issue.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::output::OutputBuffer;
use super::types::{OutputEvent, OutputLine, OutputStream, SessionInfo, SessionStatus, StatusEvent};
use crate::config::{AgentCommand, Codebase};
use crate::error::{Error, Result};
use crate::labels::LabelDefinition;
use crate::tracker::Issue;

/// How long the exit watcher waits for the readers to flush after the process exits.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
struct SessionState {
    status: SessionStatus,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    error: Option<String>,
}

#[derive(Debug)]
pub struct WorkerSession {
    key: String,
    codebase: Codebase,
    issue: Issue,
    label: LabelDefinition,
    workspace: PathBuf,
    branch: String,
    output: OutputBuffer,
    state: Mutex<SessionState>,
    cancel: CancellationToken,
}

impl WorkerSession {
    /// A `pending` session; nothing runs until [`WorkerSession::start`].
    pub fn new(
        key: impl Into<String>,
        codebase: Codebase,
        issue: Issue,
        label: LabelDefinition,
        workspace: PathBuf,
        branch: impl Into<String>,
        output_lines: usize,
    ) -> Self {
        Self {
            key: key.into(),
            codebase,
            issue,
            label,
            workspace,
            branch: branch.into(),
            output: OutputBuffer::new(output_lines),
            state: Mutex::new(SessionState {
                status: SessionStatus::Pending,
                pid: None,
                started_at: None,
                completed_at: None,
                exit_code: None,
                error: None,
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn codebase(&self) -> &Codebase {
        &self.codebase
    }

    pub fn issue(&self) -> &Issue {
        &self.issue
    }

    pub fn label(&self) -> &LabelDefinition {
        &self.label
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn status(&self) -> SessionStatus {
        self.state().status
    }

    pub fn is_running(&self) -> bool {
        self.status() == SessionStatus::Running
    }

    pub fn pid(&self) -> Option<u32> {
        self.state().pid
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.state().exit_code
    }

    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state().started_at
    }

    /// All retained output lines, oldest first.
    pub fn output(&self) -> Vec<OutputLine> {
        self.output.lines()
    }

    pub fn recent_output(&self, n: usize) -> Vec<OutputLine> {
        self.output.recent(n)
    }

    pub fn info(&self) -> SessionInfo {
        let state = self.state();
        let duration = state.started_at.and_then(|start| {
            let end = state.completed_at.unwrap_or_else(Utc::now);
            (end - start).to_std().ok()
        });
        SessionInfo {
            key: self.key.clone(),
            issue_number: self.issue.number,
            issue_title: self.issue.title.clone(),
            repo: self.codebase.repo.clone(),
            codebase: self.codebase.name.clone(),
            branch: self.branch.clone(),
            workspace: self.workspace.clone(),
            label: self.label.name.clone(),
            status: state.status,
            started_at: state.started_at,
            completed_at: state.completed_at,
            duration,
            exit_code: state.exit_code,
            error: state.error.clone(),
        }
    }

    /// Launch the agent in the workspace and start capturing its output.
    pub(crate) fn start(
        self: &Arc<Self>,
        agent: &AgentCommand,
        prompt_file: &Path,
        output_tx: mpsc::Sender<OutputEvent>,
        status_tx: mpsc::Sender<StatusEvent>,
    ) -> Result<()> {
        let mut cmd = Command::new(&agent.program);
        cmd.args(agent.render_args(prompt_file))
            .current_dir(&self.workspace)
            .env("DEV_SWARM_ISSUE", self.issue.number.to_string())
            .env("DEV_SWARM_REPO", &self.codebase.repo)
            .env("DEV_SWARM_BRANCH", &self.branch)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| Error::Launch {
            key: self.key.clone(),
            message: format!("{}: {}", agent.program, e),
        })?;

        {
            let mut state = self.state();
            state.status = SessionStatus::Running;
            state.pid = child.id();
            state.started_at = Some(Utc::now());
        }
        info!(session = %self.key, pid = ?child.id(), "Agent started");

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(self.spawn_reader(stdout, OutputStream::Stdout, output_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(self.spawn_reader(stderr, OutputStream::Stderr, output_tx));
        }

        let session = Arc::clone(self);
        tokio::spawn(async move { session.watch(child, readers, status_tx).await });
        Ok(())
    }

    /// Stop capturing and kill the agent. Idempotent; does not wait for exit.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!(session = %self.key, "Stopping session");
            self.cancel.cancel();
        }
    }

    fn spawn_reader<R>(
        self: &Arc<Self>,
        pipe: R,
        stream: OutputStream,
        tx: mpsc::Sender<OutputEvent>,
    ) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut lines = BufReader::new(pipe).lines();
            loop {
                tokio::select! {
                    () = session.cancel.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(text)) => {
                            let line = OutputLine::new(text, stream);
                            session.output.push(line.clone());
                            // Live tail only: a full channel drops the event.
                            let _ = tx.try_send(OutputEvent {
                                key: session.key.clone(),
                                line,
                            });
                        }
                        Ok(None) => break,
                        Err(e) => {
                            debug!(session = %session.key, "Output read failed: {}", e);
                            break;
                        }
                    },
                }
            }
        })
    }

    async fn watch(
        self: Arc<Self>,
        mut child: Child,
        readers: Vec<JoinHandle<()>>,
        status_tx: mpsc::Sender<StatusEvent>,
    ) {
        let result = tokio::select! {
            status = child.wait() => status,
            () = self.cancel.cancelled() => {
                if let Err(e) = child.start_kill() {
                    debug!(session = %self.key, "Kill failed: {}", e);
                }
                child.wait().await
            }
        };

        for mut reader in readers {
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, &mut reader)
                .await
                .is_err()
            {
                reader.abort();
            }
        }

        let event = self.finish(result);
        let _ = status_tx.try_send(event);
    }

    fn finish(&self, result: io::Result<ExitStatus>) -> StatusEvent {
        let stopped = self.cancel.is_cancelled();
        let mut state = self.state();
        state.completed_at = Some(Utc::now());
        match result {
            Ok(status) if status.success() => {
                state.status = SessionStatus::Completed;
                state.exit_code = Some(0);
            }
            Ok(status) => {
                state.status = SessionStatus::Failed;
                state.exit_code = status.code();
                if stopped {
                    state.error = Some("stopped".to_string());
                } else if status.code().is_none() {
                    state.error = Some("terminated by signal".to_string());
                }
            }
            Err(e) => {
                state.status = SessionStatus::Failed;
                state.error = Some(e.to_string());
            }
        }

        match state.status {
            SessionStatus::Completed => info!(session = %self.key, "Agent completed"),
            _ => warn!(
                session = %self.key,
                exit_code = ?state.exit_code,
                error = ?state.error,
                "Agent failed"
            ),
        }

        StatusEvent {
            key: self.key.clone(),
            status: state.status,
            exit_code: state.exit_code,
            error: state.error.clone(),
        }
    }

    #[cfg(any(test, feature = "test-support"))]
    #[doc(hidden)]
    pub fn force_status(&self, status: SessionStatus) {
        let mut state = self.state();
        state.status = status;
        if status.is_terminal() {
            state.completed_at = Some(Utc::now());
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for WorkerSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_codebase, sample_issue};
    use crate::labels::LabelRole;

    fn session(workspace: &Path) -> Arc<WorkerSession> {
        let codebase = sample_codebase("/src/widgets");
        let label = codebase.labels.by_role(LabelRole::ReadyToPlan).unwrap().clone();
        Arc::new(WorkerSession::new(
            "acme/widgets#7",
            codebase,
            sample_issue(7, &["user:ready-to-plan"]),
            label,
            workspace.to_path_buf(),
            "agent/issue-7",
            100,
        ))
    }

    fn sh(script: &str) -> AgentCommand {
        AgentCommand {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
        }
    }

    async fn wait_terminal(session: &WorkerSession) {
        for _ in 0..200 {
            if session.status().is_terminal() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("session never finished");
    }

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(dir.path());
        let (out_tx, mut out_rx) = mpsc::channel(10);
        let (status_tx, mut status_rx) = mpsc::channel(10);

        s.start(
            &sh("echo hello; echo \"issue $DEV_SWARM_ISSUE\"; echo oops >&2; exit 3"),
            &dir.path().join("prompt.md"),
            out_tx,
            status_tx,
        )
        .unwrap();
        wait_terminal(&s).await;

        assert_eq!(s.status(), SessionStatus::Failed);
        assert_eq!(s.exit_code(), Some(3));
        let texts: Vec<String> = s.output().into_iter().map(|l| l.text).collect();
        assert!(texts.contains(&"hello".to_string()));
        assert!(texts.contains(&"issue 7".to_string()));
        assert!(s
            .output()
            .iter()
            .any(|l| l.text == "oops" && l.stream == OutputStream::Stderr));

        let event = status_rx.recv().await.unwrap();
        assert_eq!(event.status, SessionStatus::Failed);
        assert!(out_rx.recv().await.is_some());

        let info = s.info();
        assert_eq!(info.exit_code, Some(3));
        assert!(info.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_success_is_completed() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(dir.path());
        let (out_tx, _out_rx) = mpsc::channel(10);
        let (status_tx, _status_rx) = mpsc::channel(10);
        s.start(&sh("exit 0"), &dir.path().join("p.md"), out_tx, status_tx)
            .unwrap();
        wait_terminal(&s).await;
        assert_eq!(s.status(), SessionStatus::Completed);
        assert_eq!(s.exit_code(), Some(0));
    }

    #[tokio::test]
    async fn test_full_output_channel_drops_events() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(dir.path());
        let (out_tx, mut out_rx) = mpsc::channel(1);
        let (status_tx, _status_rx) = mpsc::channel(10);
        s.start(
            &sh("for i in 1 2 3 4 5; do echo line$i; done"),
            &dir.path().join("p.md"),
            out_tx,
            status_tx,
        )
        .unwrap();
        wait_terminal(&s).await;

        assert_eq!(s.output().len(), 5);
        assert!(out_rx.try_recv().is_ok());
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(dir.path());
        let (out_tx, _out_rx) = mpsc::channel(10);
        let (status_tx, _status_rx) = mpsc::channel(10);
        s.start(&sh("sleep 30"), &dir.path().join("p.md"), out_tx, status_tx)
            .unwrap();
        assert!(s.is_running());

        s.stop();
        s.stop();
        wait_terminal(&s).await;
        assert_eq!(s.status(), SessionStatus::Failed);
        assert_eq!(s.error().as_deref(), Some("stopped"));
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(dir.path());
        let (out_tx, _out_rx) = mpsc::channel(10);
        let (status_tx, _status_rx) = mpsc::channel(10);
        let agent = AgentCommand {
            program: "/nonexistent/agent-binary".into(),
            args: vec![],
        };
        let err = s.start(&agent, &dir.path().join("p.md"), out_tx, status_tx).unwrap_err();
        assert!(matches!(err, Error::Launch { .. }));
        assert_eq!(s.status(), SessionStatus::Pending);
    }
}
