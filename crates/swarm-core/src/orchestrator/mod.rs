//! The reconciliation loop.
//!
//! ```text
//! Stopped ──start──► Running ◄──resume── Paused
//!    ▲                  │   ──pause──►     │
//!    └──────stop────────┴──────────────────┘
//! ```
//!
//! While running, one control task ticks at an adaptive interval: the active
//! interval while any session is running, the idle interval otherwise. Each
//! tick reconciles the issue table against the tracker, picks up eligible
//! issues, drains finished sessions, flags failed CI and removes workspaces of
//! merged branches. The loop is level-triggered: anything missed is corrected
//! on the next tick.

mod pickup;
mod reconcile;
mod types;

pub use pickup::{has_new_user_input, issue_has_new_user_input, pr_has_new_user_input, rule_allows};
pub use types::{CodebaseInfo, IssueInfo, RunState, StateEvent, StateUpdate, Stats};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Codebase, Config};
use crate::error::{Error, Result};
use crate::session::{SessionEvents, SessionManager, WorkerSession, session_key};
use crate::tracker::{IssueTracker, LabelInfo};
use crate::worktree::WorkspaceProvider;
use types::CodebaseState;

/// Capacity of the outbound state-update channel.
pub const UPDATE_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug)]
struct SharedState {
    codebases: BTreeMap<String, CodebaseState>,
    run_state: RunState,
    started_at: Option<DateTime<Utc>>,
    last_poll: Option<DateTime<Utc>>,
    next_poll: Option<DateTime<Utc>>,
}

pub struct Orchestrator {
    config: Config,
    codebases: Vec<Codebase>,
    tracker: Arc<dyn IssueTracker>,
    workspaces: Arc<dyn WorkspaceProvider>,
    sessions: Arc<SessionManager>,
    session_events: Mutex<Option<SessionEvents>>,
    state: RwLock<SharedState>,
    updates_tx: mpsc::Sender<StateUpdate>,
    updates_rx: Mutex<Option<mpsc::Receiver<StateUpdate>>>,
    cancel: CancellationToken,
    refresh: Notify,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        tracker: Arc<dyn IssueTracker>,
        workspaces: Arc<dyn WorkspaceProvider>,
    ) -> Self {
        let (sessions, session_events) = SessionManager::new(&config, Arc::clone(&workspaces));
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);

        Self {
            codebases: config.enabled_codebases(),
            config,
            tracker,
            workspaces,
            sessions: Arc::new(sessions),
            session_events: Mutex::new(Some(session_events)),
            state: RwLock::new(SharedState {
                codebases: BTreeMap::new(),
                run_state: RunState::Stopped,
                started_at: None,
                last_poll: None,
                next_poll: None,
            }),
            updates_tx,
            updates_rx: Mutex::new(Some(updates_rx)),
            cancel: CancellationToken::new(),
            refresh: Notify::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Enabled codebases being reconciled.
    pub fn codebases(&self) -> &[Codebase] {
        &self.codebases
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Start the control loop. Fails if already started.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if state.run_state != RunState::Stopped {
                return Err(Error::AlreadyRunning);
            }
            if self.cancel.is_cancelled() {
                return Err(Error::Other(
                    "orchestrator has been stopped and cannot be restarted".to_string(),
                ));
            }

            tokio::fs::create_dir_all(self.config.worktrees_root()).await?;

            for cb in &self.codebases {
                state
                    .codebases
                    .entry(cb.name.clone())
                    .or_insert_with(|| CodebaseState::new(cb.clone()));
            }
            state.run_state = RunState::Running;
            state.started_at = Some(Utc::now());
        }

        self.sync_labels().await;

        let events = lock(&self.session_events).take();
        let mut tasks = lock(&self.tasks);
        if let Some(events) = events {
            tasks.push(tokio::spawn(Arc::clone(self).forward_session_events(events)));
        }
        tasks.push(tokio::spawn(Arc::clone(self).run_loop()));

        info!(
            "Orchestrator started. Monitoring {} codebase(s).",
            self.codebases.len()
        );
        Ok(())
    }

    /// Cancel the loop and stop every session. A no-op unless running.
    pub async fn stop(&self) {
        {
            let mut state = self.state.write().await;
            if state.run_state == RunState::Stopped {
                return;
            }
            state.run_state = RunState::Stopped;
            state.next_poll = None;
        }

        info!("Stopping orchestrator...");
        self.cancel.cancel();
        self.sessions.stop_all().await;

        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            if let Err(e) = task.await {
                debug!("Orchestrator task ended abnormally: {}", e);
            }
        }
        info!("Orchestrator stopped.");
    }

    pub async fn pause(&self) {
        let mut state = self.state.write().await;
        if state.run_state == RunState::Running {
            state.run_state = RunState::Paused;
            info!("Polling paused.");
        }
    }

    pub async fn resume(&self) {
        let mut state = self.state.write().await;
        if state.run_state == RunState::Paused {
            state.run_state = RunState::Running;
            info!("Polling resumed.");
        }
    }

    pub async fn run_state(&self) -> RunState {
        self.state.read().await.run_state
    }

    pub async fn is_paused(&self) -> bool {
        self.run_state().await == RunState::Paused
    }

    /// Wake the loop for an immediate tick, even while paused.
    pub fn force_refresh(&self) {
        self.refresh.notify_one();
    }

    /// The update stream. Only the first caller receives it.
    pub fn subscribe(&self) -> Option<mpsc::Receiver<StateUpdate>> {
        lock(&self.updates_rx).take()
    }

    /// Interval until the next tick.
    pub async fn poll_interval(&self) -> Duration {
        let secs = if self.sessions.active_count().await > 0 {
            self.config.settings.active_poll_interval_secs
        } else {
            self.config.settings.poll_interval_secs
        };
        Duration::from_secs(secs)
    }

    pub async fn session(&self, key: &str) -> Option<Arc<WorkerSession>> {
        self.sessions.get(key).await
    }

    pub async fn stats(&self) -> Stats {
        let active_sessions = self.sessions.active_count().await;
        let total_sessions = self.sessions.total_count().await;
        let state = self.state.read().await;
        Stats {
            active_sessions,
            total_sessions,
            total_issues: state.codebases.values().map(|c| c.issues.len()).sum(),
            last_poll: state.last_poll,
            next_poll: state.next_poll,
            paused: state.run_state == RunState::Paused,
            uptime: state
                .started_at
                .and_then(|start| (Utc::now() - start).to_std().ok()),
        }
    }

    /// Snapshot of every tracked codebase and its issues.
    pub async fn codebase_info(&self) -> Vec<CodebaseInfo> {
        let sessions: BTreeMap<String, Arc<WorkerSession>> = self
            .sessions
            .all()
            .await
            .into_iter()
            .map(|s| (s.key().to_string(), s))
            .collect();

        let state = self.state.read().await;
        state
            .codebases
            .values()
            .map(|cs| {
                let issues = cs
                    .issues
                    .values()
                    .map(|is| {
                        let key = session_key(&cs.codebase.repo, is.issue.number);
                        let session = sessions.get(&key);
                        IssueInfo {
                            number: is.issue.number,
                            title: is.issue.title.clone(),
                            label: is.label.clone(),
                            has_session: is.has_session,
                            session_key: is.session_key.clone(),
                            status: session.map(|s| s.status()),
                            duration: session.and_then(|s| s.info().duration),
                            codebase: cs.codebase.name.clone(),
                            repo: cs.codebase.repo.clone(),
                        }
                    })
                    .collect::<Vec<_>>();
                CodebaseInfo {
                    name: cs.codebase.name.clone(),
                    repo: cs.codebase.repo.clone(),
                    idle: issues.is_empty(),
                    issues,
                    healthy: cs.healthy,
                    error: cs.error.clone(),
                    last_poll: cs.last_poll,
                }
            })
            .collect()
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = self.poll_once() => {}
            }

            let interval = self.poll_interval().await;
            self.state.write().await.next_poll = chrono::Duration::from_std(interval)
                .ok()
                .map(|d| Utc::now() + d);
            debug!(interval_secs = interval.as_secs(), "Waiting for next poll");

            // Skip ticks while paused; a forced refresh runs regardless.
            loop {
                let forced = tokio::select! {
                    () = self.cancel.cancelled() => return,
                    () = tokio::time::sleep(interval) => false,
                    () = self.refresh.notified() => true,
                };
                if forced || !self.is_paused().await {
                    break;
                }
            }
        }
    }

    async fn forward_session_events(self: Arc<Self>, mut events: SessionEvents) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                Some(event) = events.output.recv() => {
                    self.emit(StateEvent::SessionOutput(event));
                }
                Some(event) = events.status.recv() => {
                    info!(
                        session = %event.key,
                        status = %event.status,
                        exit_code = ?event.exit_code,
                        "Session ended"
                    );
                    self.emit(StateEvent::SessionEnded(event));
                }
                else => break,
            }
        }
    }

    /// Publish an update; dropped if the channel is full or nobody subscribed.
    fn emit(&self, event: StateEvent) {
        if let Err(mpsc::error::TrySendError::Full(update)) =
            self.updates_tx.try_send(StateUpdate::now(event))
        {
            debug!(kind = update.event.kind(), "Update channel full, dropping event");
        }
    }

    async fn sync_labels(&self) {
        for cb in &self.codebases {
            let labels: Vec<LabelInfo> = cb.labels.iter().map(LabelInfo::from).collect();
            info!(repo = %cb.repo, "Syncing labels");
            if let Err(e) = self.tracker.sync_labels(&cb.repo, &labels).await {
                warn!(repo = %cb.repo, "Failed to sync labels: {}", e);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
