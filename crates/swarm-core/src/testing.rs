//! In-memory fakes for driving the orchestrator without GitHub or git.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{Codebase, CodebaseConfig, Config, LabelsConfig};
use crate::error::{Error, Result};
use crate::tracker::{
    Author, Comment, Issue, IssueLabel, IssueTracker, LabelInfo, PrCheck, PrComment, PrReview,
    PullRequest,
};
use crate::worktree::WorkspaceProvider;

/// Config rooted at `dir` with fast intervals and no codebases.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config {
        config_dir: dir.to_path_buf(),
        ..Config::default()
    };
    config.settings.poll_interval_secs = 1;
    config.settings.active_poll_interval_secs = 1;
    config
}

pub fn sample_codebase(local_path: &str) -> Codebase {
    Codebase {
        name: "widgets".to_string(),
        repo: "acme/widgets".to_string(),
        local_path: PathBuf::from(local_path),
        default_branch: "main".to_string(),
        enabled: true,
        labels: LabelsConfig::default().resolve(),
    }
}

/// Config-file entry for a codebase named after the last repo segment.
pub fn codebase_config(repo: &str, local_path: &Path) -> CodebaseConfig {
    CodebaseConfig {
        name: repo.rsplit('/').next().unwrap_or(repo).to_string(),
        repo: repo.to_string(),
        local_path: local_path.to_path_buf(),
        default_branch: "main".to_string(),
        enabled: true,
        labels: None,
    }
}

pub fn sample_issue(number: u64, labels: &[&str]) -> Issue {
    Issue {
        number,
        title: format!("Issue {}", number),
        body: "Something needs doing.".to_string(),
        state: "OPEN".to_string(),
        labels: labels
            .iter()
            .map(|name| IssueLabel {
                name: name.to_string(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

pub fn comment(login: &str, body: &str, at: DateTime<Utc>) -> Comment {
    Comment {
        author: Author {
            login: login.to_string(),
        },
        body: body.to_string(),
        created_at: at,
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    issues: HashMap<String, BTreeMap<u64, Issue>>,
    open_prs: HashMap<String, Vec<PullRequest>>,
    merged_prs: HashMap<String, Vec<PullRequest>>,
    checks: HashMap<(String, u64), Vec<PrCheck>>,
    pr_comments: HashMap<(String, u64), Vec<PrComment>>,
    pr_reviews: HashMap<(String, u64), Vec<PrReview>>,
    failing: HashSet<String>,
    label_updates: Vec<(String, u64, Vec<String>, Vec<String>)>,
    posted: Vec<(String, u64, String)>,
    synced: Vec<(String, Vec<LabelInfo>)>,
    list_calls: usize,
}

/// Issue tracker backed by in-memory maps.
#[derive(Debug, Default)]
pub struct FakeTracker {
    state: Mutex<TrackerState>,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_issue(&self, repo: &str, issue: Issue) {
        self.state()
            .issues
            .entry(repo.to_string())
            .or_default()
            .insert(issue.number, issue);
    }

    pub fn issue(&self, repo: &str, number: u64) -> Option<Issue> {
        self.state().issues.get(repo)?.get(&number).cloned()
    }

    pub fn set_labels(&self, repo: &str, number: u64, labels: &[&str]) {
        if let Some(issue) = self
            .state()
            .issues
            .get_mut(repo)
            .and_then(|m| m.get_mut(&number))
        {
            issue.labels = labels
                .iter()
                .map(|name| IssueLabel {
                    name: name.to_string(),
                    ..Default::default()
                })
                .collect();
        }
    }

    pub fn push_comment(&self, repo: &str, number: u64, comment: Comment) {
        if let Some(issue) = self
            .state()
            .issues
            .get_mut(repo)
            .and_then(|m| m.get_mut(&number))
        {
            issue.comments.push(comment);
        }
    }

    pub fn close_issue(&self, repo: &str, number: u64) {
        if let Some(issue) = self
            .state()
            .issues
            .get_mut(repo)
            .and_then(|m| m.get_mut(&number))
        {
            issue.state = "CLOSED".to_string();
        }
    }

    pub fn add_open_pr(&self, repo: &str, pr: PullRequest) {
        self.state()
            .open_prs
            .entry(repo.to_string())
            .or_default()
            .push(pr);
    }

    pub fn add_merged_pr(&self, repo: &str, pr: PullRequest) {
        self.state()
            .merged_prs
            .entry(repo.to_string())
            .or_default()
            .push(pr);
    }

    pub fn set_checks(&self, repo: &str, pr: u64, checks: Vec<PrCheck>) {
        self.state().checks.insert((repo.to_string(), pr), checks);
    }

    pub fn add_pr_comment(&self, repo: &str, pr: u64, comment: PrComment) {
        self.state()
            .pr_comments
            .entry((repo.to_string(), pr))
            .or_default()
            .push(comment);
    }

    pub fn add_pr_review(&self, repo: &str, pr: u64, review: PrReview) {
        self.state()
            .pr_reviews
            .entry((repo.to_string(), pr))
            .or_default()
            .push(review);
    }

    /// Make every call against `repo` fail.
    pub fn set_failing(&self, repo: &str, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing.insert(repo.to_string());
        } else {
            state.failing.remove(repo);
        }
    }

    pub fn label_updates(&self) -> Vec<(String, u64, Vec<String>, Vec<String>)> {
        self.state().label_updates.clone()
    }

    pub fn posted_comments(&self) -> Vec<(String, u64, String)> {
        self.state().posted.clone()
    }

    pub fn synced_repos(&self) -> Vec<String> {
        self.state().synced.iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    fn check(&self, operation: &str, repo: &str) -> Result<()> {
        if self.state().failing.contains(repo) {
            return Err(Error::tracker(operation, repo, "simulated outage"));
        }
        Ok(())
    }
}

#[async_trait]
impl IssueTracker for FakeTracker {
    async fn list_issues_with_labels(&self, repo: &str, labels: &[String]) -> Result<Vec<Issue>> {
        self.state().list_calls += 1;
        self.check("list issues", repo)?;
        let state = self.state();
        let issues = state
            .issues
            .get(repo)
            .map(|m| {
                m.values()
                    .filter(|i| i.state != "CLOSED")
                    .filter(|i| i.labels.iter().any(|l| labels.contains(&l.name)))
                    .map(|i| Issue {
                        comments: Vec::new(),
                        ..i.clone()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(issues)
    }

    async fn get_issue(&self, repo: &str, number: u64) -> Result<Issue> {
        self.check("get issue", repo)?;
        self.issue(repo, number)
            .ok_or_else(|| Error::tracker("get issue", repo, format!("#{} not found", number)))
    }

    async fn update_issue_labels(
        &self,
        repo: &str,
        number: u64,
        remove: &[String],
        add: &[String],
    ) -> Result<()> {
        self.check("update labels", repo)?;
        let mut state = self.state();
        state
            .label_updates
            .push((repo.to_string(), number, remove.to_vec(), add.to_vec()));
        if let Some(issue) = state.issues.get_mut(repo).and_then(|m| m.get_mut(&number)) {
            issue.labels.retain(|l| !remove.contains(&l.name));
            for name in add {
                if !issue.labels.iter().any(|l| &l.name == name) {
                    issue.labels.push(IssueLabel {
                        name: name.clone(),
                        ..Default::default()
                    });
                }
            }
        }
        Ok(())
    }

    async fn add_comment(&self, repo: &str, number: u64, body: &str) -> Result<()> {
        self.check("add comment", repo)?;
        self.state()
            .posted
            .push((repo.to_string(), number, body.to_string()));
        Ok(())
    }

    async fn pr_for_branch(&self, repo: &str, branch: &str) -> Result<Option<PullRequest>> {
        self.check("find pull request", repo)?;
        Ok(self
            .state()
            .open_prs
            .get(repo)
            .and_then(|prs| prs.iter().find(|pr| pr.head_ref_name == branch).cloned()))
    }

    async fn pr_comments(&self, repo: &str, pr: u64) -> Result<Vec<PrComment>> {
        self.check("pr comments", repo)?;
        Ok(self
            .state()
            .pr_comments
            .get(&(repo.to_string(), pr))
            .cloned()
            .unwrap_or_default())
    }

    async fn pr_reviews(&self, repo: &str, pr: u64) -> Result<Vec<PrReview>> {
        self.check("pr reviews", repo)?;
        Ok(self
            .state()
            .pr_reviews
            .get(&(repo.to_string(), pr))
            .cloned()
            .unwrap_or_default())
    }

    async fn pr_checks(&self, repo: &str, pr: u64) -> Result<Vec<PrCheck>> {
        self.check("pr checks", repo)?;
        Ok(self
            .state()
            .checks
            .get(&(repo.to_string(), pr))
            .cloned()
            .unwrap_or_default())
    }

    async fn merged_prs(&self, repo: &str) -> Result<Vec<PullRequest>> {
        self.check("merged pull requests", repo)?;
        Ok(self.state().merged_prs.get(repo).cloned().unwrap_or_default())
    }

    async fn sync_labels(&self, repo: &str, labels: &[LabelInfo]) -> Result<()> {
        self.check("sync labels", repo)?;
        self.state().synced.push((repo.to_string(), labels.to_vec()));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct WorkspaceState {
    ensured: Vec<PathBuf>,
    removed: Vec<PathBuf>,
    fail_ensure: bool,
}

/// Workspace provider that creates plain directories instead of git worktrees.
#[derive(Debug, Default)]
pub struct FakeWorkspaces {
    state: Mutex<WorkspaceState>,
}

impl FakeWorkspaces {
    fn state(&self) -> MutexGuard<'_, WorkspaceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn ensured(&self) -> Vec<PathBuf> {
        self.state().ensured.clone()
    }

    pub fn removed(&self) -> Vec<PathBuf> {
        self.state().removed.clone()
    }

    pub fn fail_ensure(&self, fail: bool) {
        self.state().fail_ensure = fail;
    }
}

#[async_trait]
impl WorkspaceProvider for FakeWorkspaces {
    async fn exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    async fn ensure(&self, _codebase: &Codebase, path: &Path, _branch: &str) -> Result<()> {
        if self.state().fail_ensure {
            return Err(Error::Worktree("simulated failure".to_string()));
        }
        std::fs::create_dir_all(path)?;
        self.state().ensured.push(path.to_path_buf());
        Ok(())
    }

    async fn remove(&self, _codebase: &Codebase, path: &Path, _delete_branch: bool) -> Result<()> {
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        self.state().removed.push(path.to_path_buf());
        Ok(())
    }
}
