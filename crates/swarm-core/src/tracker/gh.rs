//! [`IssueTracker`] backed by the GitHub CLI.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::process::Command;
use tracing::debug;

use super::{Issue, IssueTracker, LabelInfo, PrCheck, PrComment, PrReview, PullRequest};
use crate::error::{Error, Result};

const ENV_GH_BIN: &str = "DEV_SWARM_GH_BIN";
const ISSUE_LIST_FIELDS: &str = "number,title,body,state,url,labels,createdAt,updatedAt";
const ISSUE_VIEW_FIELDS: &str = "number,title,body,state,url,labels,comments,createdAt,updatedAt";
const PR_FIELDS: &str = "number,title,state,url,headRefName,baseRefName,mergedAt";
const ISSUE_LIST_LIMIT: &str = "100";
const MERGED_PR_LIMIT: &str = "50";

/// Runs `gh` subcommands and decodes their `--json` output.
#[derive(Debug, Clone)]
pub struct GhCli {
    binary: PathBuf,
}

impl Default for GhCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GhCli {
    /// Uses `$DEV_SWARM_GH_BIN` when set, else `gh` from `PATH`.
    pub fn new() -> Self {
        let binary = std::env::var_os(ENV_GH_BIN)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("gh"));
        Self { binary }
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Whether the `gh` executable can be found.
    pub fn is_installed(&self) -> bool {
        which::which(&self.binary).is_ok()
    }

    /// Whether `gh auth status` succeeds.
    pub async fn is_authenticated(&self) -> bool {
        match self.output(&["auth", "status"]).await {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }

    /// Whether `repo` exists and is visible to the authenticated user.
    pub async fn repo_exists(&self, repo: &str) -> bool {
        self.run("view repository", repo, &["repo", "view", repo, "--json", "name"])
            .await
            .is_ok()
    }

    async fn output(&self, args: &[&str]) -> Result<Output> {
        let output = Command::new(&self.binary).args(args).output().await?;
        Ok(output)
    }

    async fn run(&self, operation: &str, repo: &str, args: &[&str]) -> Result<String> {
        debug!(repo = %repo, "gh {}", args.join(" "));
        let output = self
            .output(args)
            .await
            .map_err(|e| Error::tracker(operation, repo, e.to_string()))?;

        if !output.status.success() {
            return Err(Error::tracker(operation, repo, output_detail(&output)));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run_json<T: DeserializeOwned + Default>(
        &self,
        operation: &str,
        repo: &str,
        args: &[&str],
    ) -> Result<T> {
        let stdout = self.run(operation, repo, args).await?;
        if stdout.is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&stdout).map_err(|e| Error::tracker(operation, repo, e.to_string()))
    }

    async fn issues_with_label(&self, repo: &str, label: &str) -> Result<Vec<Issue>> {
        self.run_json(
            "list issues",
            repo,
            &[
                "issue",
                "list",
                "--repo",
                repo,
                "--label",
                label,
                "--state",
                "open",
                "--json",
                ISSUE_LIST_FIELDS,
                "--limit",
                ISSUE_LIST_LIMIT,
            ],
        )
        .await
    }
}

fn output_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !stdout.is_empty() {
        return stdout;
    }
    format!("exit status {}", output.status)
}

#[derive(Default, Deserialize)]
struct PrCommentsEnvelope {
    #[serde(default)]
    comments: Vec<PrComment>,
}

#[derive(Default, Deserialize)]
struct PrReviewsEnvelope {
    #[serde(default)]
    reviews: Vec<PrReview>,
}

/// Merge per-label query results, keeping the first occurrence of each issue.
pub(crate) fn dedup_issues(batches: Vec<Vec<Issue>>) -> Vec<Issue> {
    let mut seen = HashSet::new();
    batches
        .into_iter()
        .flatten()
        .filter(|issue| seen.insert(issue.number))
        .collect()
}

#[async_trait]
impl IssueTracker for GhCli {
    async fn list_issues_with_labels(&self, repo: &str, labels: &[String]) -> Result<Vec<Issue>> {
        // gh ANDs repeated --label flags, so each label is queried separately.
        let mut batches = Vec::with_capacity(labels.len());
        for label in labels {
            batches.push(self.issues_with_label(repo, label).await?);
        }
        Ok(dedup_issues(batches))
    }

    async fn get_issue(&self, repo: &str, number: u64) -> Result<Issue> {
        let n = number.to_string();
        let stdout = self
            .run(
                "get issue",
                repo,
                &["issue", "view", &n, "--repo", repo, "--json", ISSUE_VIEW_FIELDS],
            )
            .await?;
        serde_json::from_str(&stdout).map_err(|e| Error::tracker("get issue", repo, e.to_string()))
    }

    async fn update_issue_labels(
        &self,
        repo: &str,
        number: u64,
        remove: &[String],
        add: &[String],
    ) -> Result<()> {
        let n = number.to_string();
        let mut args = vec!["issue", "edit", n.as_str(), "--repo", repo];
        for label in remove {
            args.push("--remove-label");
            args.push(label);
        }
        for label in add {
            args.push("--add-label");
            args.push(label);
        }
        self.run("update labels", repo, &args).await?;
        Ok(())
    }

    async fn add_comment(&self, repo: &str, number: u64, body: &str) -> Result<()> {
        let n = number.to_string();
        self.run(
            "add comment",
            repo,
            &["issue", "comment", &n, "--repo", repo, "--body", body],
        )
        .await?;
        Ok(())
    }

    async fn pr_for_branch(&self, repo: &str, branch: &str) -> Result<Option<PullRequest>> {
        let prs: Vec<PullRequest> = self
            .run_json(
                "find pull request",
                repo,
                &[
                    "pr", "list", "--repo", repo, "--head", branch, "--state", "open", "--json",
                    PR_FIELDS,
                ],
            )
            .await?;
        Ok(prs.into_iter().next())
    }

    async fn pr_comments(&self, repo: &str, pr: u64) -> Result<Vec<PrComment>> {
        let n = pr.to_string();
        let envelope: PrCommentsEnvelope = self
            .run_json(
                "pr comments",
                repo,
                &["pr", "view", &n, "--repo", repo, "--json", "comments"],
            )
            .await?;
        Ok(envelope.comments)
    }

    async fn pr_reviews(&self, repo: &str, pr: u64) -> Result<Vec<PrReview>> {
        let n = pr.to_string();
        let envelope: PrReviewsEnvelope = self
            .run_json(
                "pr reviews",
                repo,
                &["pr", "view", &n, "--repo", repo, "--json", "reviews"],
            )
            .await?;
        Ok(envelope.reviews)
    }

    async fn pr_checks(&self, repo: &str, pr: u64) -> Result<Vec<PrCheck>> {
        let n = pr.to_string();
        // `gh pr checks` exits non-zero when no checks are reported.
        match self
            .run_json(
                "pr checks",
                repo,
                &["pr", "checks", &n, "--repo", repo, "--json", "name,state,bucket"],
            )
            .await
        {
            Ok(checks) => Ok(checks),
            Err(e) => {
                debug!(repo = %repo, pr, "No checks reported: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn merged_prs(&self, repo: &str) -> Result<Vec<PullRequest>> {
        self.run_json(
            "merged pull requests",
            repo,
            &[
                "pr", "list", "--repo", repo, "--state", "merged", "--json", PR_FIELDS, "--limit",
                MERGED_PR_LIMIT,
            ],
        )
        .await
    }

    async fn sync_labels(&self, repo: &str, labels: &[LabelInfo]) -> Result<()> {
        for label in labels {
            self.run(
                "sync labels",
                repo,
                &[
                    "label",
                    "create",
                    &label.name,
                    "--repo",
                    repo,
                    "--color",
                    &label.color,
                    "--description",
                    &label.description,
                    "--force",
                ],
            )
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(number: u64) -> Issue {
        Issue {
            number,
            ..Default::default()
        }
    }

    #[test]
    fn test_dedup_issues_keeps_first() {
        let merged = dedup_issues(vec![vec![issue(1), issue(2)], vec![issue(2), issue(3)]]);
        let numbers: Vec<u64> = merged.iter().map(|i| i.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_reviews_envelope() {
        let json = r#"{"reviews": [{"author": {"login": "bob"}, "state": "APPROVED", "submittedAt": "2026-03-01T10:00:00Z"}]}"#;
        let envelope: PrReviewsEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.reviews.len(), 1);
        assert_eq!(envelope.reviews[0].state, "APPROVED");
    }

    #[tokio::test]
    async fn test_missing_binary_is_tracker_error() {
        let gh = GhCli::with_binary("/nonexistent/dev-swarm-gh");
        assert!(!gh.is_installed());
        assert!(!gh.is_authenticated().await);
        assert!(!gh.repo_exists("acme/widgets").await);
        let err = gh.merged_prs("acme/widgets").await.unwrap_err();
        assert!(matches!(err, Error::Tracker { .. }));
    }
}
