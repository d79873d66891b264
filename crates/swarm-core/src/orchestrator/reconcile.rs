//! One reconciliation tick.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::pickup::{issue_has_new_user_input, pr_has_new_user_input, rule_allows};
use super::types::{CodebaseState, IssueState, StateEvent};
use super::{Orchestrator, SharedState};
use crate::config::Codebase;
use crate::error::Error;
use crate::labels::{LabelDefinition, LabelRole, PickupRule};
use crate::session::{SpawnRequest, WorkerSession, session_key};
use crate::tracker::{Issue, checks_failed};
use crate::worktree::{branch_name, issue_from_branch, worktree_path};

fn codebase_state<'a>(state: &'a mut SharedState, cb: &Codebase) -> &'a mut CodebaseState {
    state
        .codebases
        .entry(cb.name.clone())
        .or_insert_with(|| CodebaseState::new(cb.clone()))
}

impl Orchestrator {
    /// Run a single tick over every enabled codebase.
    pub async fn poll_once(&self) {
        debug!("Polling {} codebase(s)", self.codebases.len());

        for cb in &self.codebases {
            if self.cancel.is_cancelled() {
                return;
            }
            self.poll_codebase(cb).await;
        }

        self.drain_finished().await;

        for cb in &self.codebases {
            if self.cancel.is_cancelled() {
                return;
            }
            if !self.is_healthy(cb).await {
                continue;
            }
            self.check_ci(cb).await;
            self.sweep_merged(cb).await;
        }

        self.state.write().await.last_poll = Some(Utc::now());
        self.emit(StateEvent::PollComplete);
    }

    async fn is_healthy(&self, cb: &Codebase) -> bool {
        self.state
            .read()
            .await
            .codebases
            .get(&cb.name)
            .is_none_or(|cs| cs.healthy)
    }

    async fn poll_codebase(&self, cb: &Codebase) {
        let labels = cb.labels.pickup_label_names();
        let issues = match self.tracker.list_issues_with_labels(&cb.repo, &labels).await {
            Ok(issues) => issues,
            Err(e) => {
                warn!(codebase = %cb.name, "Failed to query issues: {}", e);
                {
                    let mut state = self.state.write().await;
                    let cs = codebase_state(&mut state, cb);
                    cs.healthy = false;
                    cs.error = Some(e.to_string());
                }
                self.emit(StateEvent::Error {
                    codebase: Some(cb.name.clone()),
                    message: e.to_string(),
                });
                return;
            }
        };

        self.reconcile_issues(cb, issues).await;

        for (number, label) in self.pickup_candidates(cb).await {
            if self.cancel.is_cancelled() {
                return;
            }
            self.try_pickup(cb, number, &label).await;
        }
    }

    /// Insert new, update relabelled and delete vanished issue entries.
    async fn reconcile_issues(&self, cb: &Codebase, issues: Vec<Issue>) {
        let mut state = self.state.write().await;
        let cs = codebase_state(&mut state, cb);
        if !cs.healthy {
            info!(codebase = %cb.name, "Codebase recovered");
        }
        cs.healthy = true;
        cs.error = None;
        cs.last_poll = Some(Utc::now());

        let mut seen = HashSet::new();
        for issue in issues {
            let Some(label) = cb.labels.current_label(&issue) else {
                continue;
            };
            let label = label.name.clone();
            let number = issue.number;
            seen.insert(number);

            match cs.issues.get_mut(&number) {
                Some(existing) => {
                    if existing.label != label {
                        info!(
                            codebase = %cb.name,
                            issue = number,
                            from = %existing.label,
                            to = %label,
                            "Label changed"
                        );
                        let from = std::mem::replace(&mut existing.label, label.clone());
                        self.emit(StateEvent::LabelChanged {
                            codebase: cb.name.clone(),
                            issue: number,
                            from,
                            to: label,
                        });
                    }
                    existing.issue = issue;
                    existing.last_checked = Utc::now();
                }
                None => {
                    info!(codebase = %cb.name, issue = number, label = %label, "Issue found");
                    self.emit(StateEvent::IssueFound {
                        codebase: cb.name.clone(),
                        issue: number,
                        label: label.clone(),
                    });
                    cs.issues.insert(number, IssueState::new(issue, label));
                }
            }
        }

        let vanished: Vec<u64> = cs
            .issues
            .keys()
            .filter(|n| !seen.contains(n))
            .copied()
            .collect();
        for number in vanished {
            cs.issues.remove(&number);
            debug!(codebase = %cb.name, issue = number, "Issue no longer tracked");
            self.emit(StateEvent::IssueRemoved {
                codebase: cb.name.clone(),
                issue: number,
            });
        }
    }

    /// Unbound entries whose label can be picked up, lowest issue number first.
    async fn pickup_candidates(&self, cb: &Codebase) -> Vec<(u64, LabelDefinition)> {
        let state = self.state.read().await;
        let Some(cs) = state.codebases.get(&cb.name) else {
            return Vec::new();
        };
        cs.issues
            .values()
            .filter(|is| !is.has_session)
            .filter_map(|is| {
                cb.labels
                    .by_name(&is.label)
                    .filter(|def| def.pickup != PickupRule::Never)
                    .map(|def| (is.issue.number, def.clone()))
            })
            .collect()
    }

    async fn try_pickup(&self, cb: &Codebase, number: u64, label: &LabelDefinition) {
        let key = session_key(&cb.repo, number);
        if self.sessions.has_session(&key).await {
            return;
        }
        if !self.sessions.can_spawn().await {
            debug!(session = %key, "At session capacity, deferring pickup");
            return;
        }

        // The listing carries no comments; fetch the full issue for the
        // decision and the prompt.
        let issue = match self.tracker.get_issue(&cb.repo, number).await {
            Ok(issue) => issue,
            Err(e) => {
                warn!(session = %key, "Failed to fetch issue: {}", e);
                return;
            }
        };
        if cb.labels.current_label(&issue).map(|l| l.name.as_str()) != Some(label.name.as_str()) {
            debug!(session = %key, "Label moved since listing, skipping");
            return;
        }

        let new_input = label.pickup == PickupRule::OnNewUserInput
            && self.has_new_user_input(cb, &issue, label).await;
        if !rule_allows(label.pickup, new_input) {
            return;
        }

        let request = SpawnRequest {
            codebase: cb.clone(),
            issue,
            label: label.clone(),
        };
        match self.sessions.spawn_session(request).await {
            Ok(session) => {
                self.bind_session(cb, number, &session).await;
                self.emit(StateEvent::SessionStarted {
                    codebase: cb.name.clone(),
                    issue: number,
                    info: session.info(),
                });
            }
            Err(Error::SessionExists(_) | Error::MaxSessionsReached) => {
                debug!(session = %key, "Pickup lost a race, retrying next tick");
            }
            Err(e) => {
                warn!(session = %key, "Failed to start session: {}", e);
                self.emit(StateEvent::Error {
                    codebase: Some(cb.name.clone()),
                    message: format!("failed to start session for #{}: {}", number, e),
                });
            }
        }
    }

    /// Issue comments first; for the review label, pull request comments and
    /// reviews as well.
    async fn has_new_user_input(&self, cb: &Codebase, issue: &Issue, label: &LabelDefinition) -> bool {
        if issue_has_new_user_input(issue) {
            return true;
        }
        if label.role != LabelRole::CodeReview {
            return false;
        }

        let pr = match self.tracker.pr_for_branch(&cb.repo, &branch_name(issue.number)).await {
            Ok(Some(pr)) => pr,
            Ok(None) => return false,
            Err(e) => {
                warn!(codebase = %cb.name, issue = issue.number, "Failed to find pull request: {}", e);
                return false;
            }
        };
        let comments = self.tracker.pr_comments(&cb.repo, pr.number).await;
        let reviews = self.tracker.pr_reviews(&cb.repo, pr.number).await;
        match (comments, reviews) {
            (Ok(comments), Ok(reviews)) => pr_has_new_user_input(&comments, &reviews),
            (Err(e), _) | (_, Err(e)) => {
                warn!(codebase = %cb.name, pr = pr.number, "Failed to read pull request activity: {}", e);
                false
            }
        }
    }

    async fn bind_session(&self, cb: &Codebase, number: u64, session: &WorkerSession) {
        let mut state = self.state.write().await;
        if let Some(is) = codebase_state(&mut state, cb).issues.get_mut(&number) {
            is.has_session = true;
            is.session_key = Some(session.key().to_string());
        }
    }

    /// Remove terminal sessions, unbind them and collect workspaces of finished issues.
    async fn drain_finished(&self) {
        for session in self.sessions.cleanup_completed().await {
            let cb = session.codebase();
            let number = session.issue().number;
            info!(
                session = %session.key(),
                status = %session.status(),
                exit_code = ?session.exit_code(),
                "Session drained"
            );

            {
                let mut state = self.state.write().await;
                if let Some(is) = codebase_state(&mut state, cb).issues.get_mut(&number) {
                    if is.session_key.as_deref() == Some(session.key()) {
                        is.has_session = false;
                        is.session_key = None;
                    }
                }
            }

            self.collect_if_done(&session).await;
        }
    }

    async fn collect_if_done(&self, session: &Arc<WorkerSession>) {
        let cb = session.codebase();
        let Some(done) = cb.labels.name_of(LabelRole::Done) else {
            return;
        };
        match self.tracker.get_issue(&cb.repo, session.issue().number).await {
            Ok(issue) if issue.has_label(done) => {
                info!(session = %session.key(), "Issue done, removing workspace");
                if let Err(e) = self.workspaces.remove(cb, session.workspace(), false).await {
                    warn!(session = %session.key(), "Failed to remove workspace: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(session = %session.key(), "Failed to fetch issue after session: {}", e);
            }
        }
    }

    /// Flag issues whose pull request has failing checks.
    async fn check_ci(&self, cb: &Codebase) {
        let Some(ci_failed) = cb.labels.name_of(LabelRole::CiFailed) else {
            return;
        };

        let mut targets: BTreeMap<u64, String> = {
            let state = self.state.read().await;
            state
                .codebases
                .get(&cb.name)
                .map(|cs| {
                    cs.issues
                        .values()
                        .filter(|is| !is.has_session)
                        .filter(|is| {
                            cb.labels.is_role(&is.label, LabelRole::CodeReview)
                                || cb.labels.is_role(&is.label, LabelRole::Implementing)
                        })
                        .map(|is| (is.issue.number, is.label.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        // Implementing issues are not pickup-eligible, so they are not in the table.
        if let Some(implementing) = cb.labels.name_of(LabelRole::Implementing) {
            match self
                .tracker
                .list_issues_with_labels(&cb.repo, &[implementing.to_string()])
                .await
            {
                Ok(issues) => {
                    for issue in issues {
                        targets
                            .entry(issue.number)
                            .or_insert_with(|| implementing.to_string());
                    }
                }
                Err(e) => warn!(codebase = %cb.name, "Failed to query implementing issues: {}", e),
            }
        }

        for (number, label) in targets {
            if label == ci_failed || self.sessions.has_session(&session_key(&cb.repo, number)).await {
                continue;
            }

            let pr = match self.tracker.pr_for_branch(&cb.repo, &branch_name(number)).await {
                Ok(Some(pr)) => pr,
                Ok(None) => continue,
                Err(e) => {
                    debug!(codebase = %cb.name, issue = number, "Failed to find pull request: {}", e);
                    continue;
                }
            };
            let checks = match self.tracker.pr_checks(&cb.repo, pr.number).await {
                Ok(checks) => checks,
                Err(e) => {
                    debug!(codebase = %cb.name, pr = pr.number, "Failed to read checks: {}", e);
                    continue;
                }
            };
            if !checks_failed(&checks) {
                continue;
            }

            info!(codebase = %cb.name, issue = number, pr = pr.number, "CI failed");
            if let Err(e) = self
                .tracker
                .update_issue_labels(&cb.repo, number, &[label.clone()], &[ci_failed.to_string()])
                .await
            {
                warn!(codebase = %cb.name, issue = number, "Failed to flag CI failure: {}", e);
                self.emit(StateEvent::Error {
                    codebase: Some(cb.name.clone()),
                    message: format!("failed to label #{} as {}: {}", number, ci_failed, e),
                });
                continue;
            }

            {
                let mut state = self.state.write().await;
                if let Some(is) = codebase_state(&mut state, cb).issues.get_mut(&number) {
                    is.label = ci_failed.to_string();
                }
            }
            self.emit(StateEvent::LabelChanged {
                codebase: cb.name.clone(),
                issue: number,
                from: label,
                to: ci_failed.to_string(),
            });
        }
    }

    /// Remove workspaces whose managed branch has been merged.
    async fn sweep_merged(&self, cb: &Codebase) {
        let prs = match self.tracker.merged_prs(&cb.repo).await {
            Ok(prs) => prs,
            Err(e) => {
                debug!(codebase = %cb.name, "Failed to list merged pull requests: {}", e);
                return;
            }
        };

        let root = self.config.worktrees_root();
        for pr in prs {
            let Some(number) = issue_from_branch(&pr.head_ref_name) else {
                continue;
            };
            let path = worktree_path(&root, &cb.name, number);
            if !self.workspaces.exists(&path).await
                || self.sessions.has_session(&session_key(&cb.repo, number)).await
            {
                continue;
            }

            info!(codebase = %cb.name, issue = number, pr = pr.number, "Branch merged, removing workspace");
            if let Err(e) = self.workspaces.remove(cb, &path, true).await {
                warn!(codebase = %cb.name, issue = number, "Failed to remove workspace: {}", e);
            }
        }
    }
}
