//! Issue tracker interface.
//!
//! The reconciliation loop only talks to the tracker through [`IssueTracker`].
//! Every call is remote and fallible; callers contain failures to the tick
//! that produced them.

mod gh;

pub use gh::GhCli;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::labels::LabelDefinition;

/// An issue as returned by the tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub labels: Vec<IssueLabel>,
    /// Only populated by [`IssueTracker::get_issue`].
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Issue {
    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l.name == name)
    }

    pub fn label_names(&self) -> Vec<&str> {
        self.labels.iter().map(|l| l.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueLabel {
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub login: String,
}

/// Issue comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Pull request summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub head_ref_name: String,
    #[serde(default)]
    pub base_ref_name: String,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
}

/// Pull request review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrReview {
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub body: String,
    /// APPROVED, CHANGES_REQUESTED, COMMENTED, ...
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Pull request conversation comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrComment {
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// One CI check attached to a pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrCheck {
    #[serde(default)]
    pub name: String,
    /// Raw check state, e.g. SUCCESS, FAILURE, PENDING
    #[serde(default)]
    pub state: String,
    /// Normalized outcome: pass, fail, pending, skipping or cancel
    #[serde(default)]
    pub bucket: String,
}

impl PrCheck {
    /// A check that finished with a failing conclusion.
    pub fn is_failed(&self) -> bool {
        self.bucket == "fail"
            || self.state.eq_ignore_ascii_case("failure")
            || self.state.eq_ignore_ascii_case("error")
    }
}

/// Whether any check failed.
pub fn checks_failed(checks: &[PrCheck]) -> bool {
    checks.iter().any(PrCheck::is_failed)
}

/// Label as pushed to the tracker by `sync_labels`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelInfo {
    pub name: String,
    pub color: String,
    pub description: String,
}

impl From<&LabelDefinition> for LabelInfo {
    fn from(def: &LabelDefinition) -> Self {
        Self {
            name: def.name.clone(),
            color: def.color.clone(),
            description: def.description.clone(),
        }
    }
}

/// Issue/label/PR operations consumed by the orchestrator.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Open issues carrying any of `labels`, deduplicated by number.
    async fn list_issues_with_labels(&self, repo: &str, labels: &[String]) -> Result<Vec<Issue>>;

    /// One issue with its full comment history.
    async fn get_issue(&self, repo: &str, number: u64) -> Result<Issue>;

    /// Remove then add labels on an issue.
    async fn update_issue_labels(
        &self,
        repo: &str,
        number: u64,
        remove: &[String],
        add: &[String],
    ) -> Result<()>;

    async fn add_comment(&self, repo: &str, number: u64, body: &str) -> Result<()>;

    /// The open pull request whose head is `branch`, if any.
    async fn pr_for_branch(&self, repo: &str, branch: &str) -> Result<Option<PullRequest>>;

    async fn pr_comments(&self, repo: &str, pr: u64) -> Result<Vec<PrComment>>;

    async fn pr_reviews(&self, repo: &str, pr: u64) -> Result<Vec<PrReview>>;

    /// CI checks for a pull request; empty when none are configured.
    async fn pr_checks(&self, repo: &str, pr: u64) -> Result<Vec<PrCheck>>;

    /// Recently merged pull requests.
    async fn merged_prs(&self, repo: &str) -> Result<Vec<PullRequest>>;

    /// Create or update label definitions on the repository.
    async fn sync_labels(&self, repo: &str, labels: &[LabelInfo]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_deserializes_from_gh_json() {
        let json = r#"{
            "number": 7,
            "title": "Add widget",
            "body": "Please",
            "state": "OPEN",
            "labels": [{"name": "user:ready-to-plan", "color": "0052CC"}],
            "comments": [{"author": {"login": "alice"}, "body": "hi", "createdAt": "2026-01-02T03:04:05Z"}],
            "createdAt": "2026-01-01T00:00:00Z"
        }"#;
        let issue: Issue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.number, 7);
        assert!(issue.has_label("user:ready-to-plan"));
        assert_eq!(issue.comments[0].author.login, "alice");
        assert!(issue.updated_at.is_none());
    }

    #[test]
    fn test_checks_failed() {
        let pass = PrCheck {
            name: "build".into(),
            state: "SUCCESS".into(),
            bucket: "pass".into(),
        };
        let pending = PrCheck {
            name: "lint".into(),
            state: "PENDING".into(),
            bucket: "pending".into(),
        };
        let failed = PrCheck {
            name: "test".into(),
            state: "FAILURE".into(),
            bucket: "fail".into(),
        };
        assert!(!checks_failed(&[]));
        assert!(!checks_failed(&[pass.clone(), pending]));
        assert!(checks_failed(&[pass, failed]));
    }

    #[test]
    fn test_pull_request_head_ref() {
        let json = r#"[{"number": 12, "title": "t", "headRefName": "agent/issue-7", "mergedAt": "2026-01-01T00:00:00Z"}]"#;
        let prs: Vec<PullRequest> = serde_json::from_str(json).unwrap();
        assert_eq!(prs[0].head_ref_name, "agent/issue-7");
        assert!(prs[0].merged_at.is_some());
    }
}
