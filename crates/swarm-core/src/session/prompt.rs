//! Prompt artifact handed to the agent, and the agent comment marker.

use std::path::Path;

use chrono::Utc;

use crate::config::Codebase;
use crate::labels::{LabelDefinition, LabelRole};
use crate::tracker::Issue;

/// Opening marker of an agent-authored comment.
pub const AGENT_MARKER_START: &str = "<!-- dev-swarm:ai -->";
/// Closing marker of an agent-authored comment.
pub const AGENT_MARKER_END: &str = "<!-- /dev-swarm:ai -->";

/// File name of the prompt inside the workspace.
pub const PROMPT_FILE_NAME: &str = ".dev-swarm-prompt.md";

/// Whether a comment body carries the agent marker.
pub fn is_agent_comment(body: &str) -> bool {
    body.contains(AGENT_MARKER_START)
}

pub fn wrap_agent_comment(content: &str) -> String {
    format!("{}\n{}\n{}", AGENT_MARKER_START, content, AGENT_MARKER_END)
}

pub fn strip_agent_markers(body: &str) -> String {
    body.replace(AGENT_MARKER_START, "")
        .replace(AGENT_MARKER_END, "")
        .trim()
        .to_string()
}

/// Everything the prompt is built from.
pub struct PromptContext<'a> {
    pub codebase: &'a Codebase,
    pub issue: &'a Issue,
    pub label: &'a LabelDefinition,
    pub branch: &'a str,
    pub workspace: &'a Path,
    pub general_instructions: &'a str,
    pub approval_keywords: &'a [String],
    pub max_comments: usize,
}

pub fn build_prompt(ctx: &PromptContext<'_>) -> String {
    let issue = ctx.issue;
    let repo = &ctx.codebase.repo;
    let mut out = String::new();

    out.push_str("# dev-swarm Task\n\n");
    out.push_str(&format!("**Generated**: {}\n\n", Utc::now().to_rfc3339()));

    out.push_str("## Repository\n\n");
    out.push_str(&format!("- **Repo**: {}\n", repo));
    out.push_str(&format!("- **Workspace**: {}\n", ctx.workspace.display()));
    out.push_str(&format!("- **Default Branch**: {}\n", ctx.codebase.default_branch));
    out.push_str(&format!("- **Working Branch**: {}\n\n", ctx.branch));

    out.push_str("## Issue\n\n");
    out.push_str(&format!("- **Number**: #{}\n", issue.number));
    out.push_str(&format!("- **Title**: {}\n", issue.title));
    if !issue.url.is_empty() {
        out.push_str(&format!("- **URL**: {}\n", issue.url));
    }
    out.push_str(&format!("- **Current Label**: {}\n\n", ctx.label.name));

    out.push_str("### Description\n\n");
    out.push_str(&format!("{}\n\n", issue.body));

    if !issue.comments.is_empty() {
        out.push_str("### Comments\n\n");
        let total = issue.comments.len();
        let start = total.saturating_sub(ctx.max_comments);
        if start > 0 {
            out.push_str(&format!(
                "*(Showing last {} of {} comments)*\n\n",
                total - start,
                total
            ));
        }
        for comment in &issue.comments[start..] {
            let tag = if is_agent_comment(&comment.body) {
                " (agent)"
            } else {
                ""
            };
            out.push_str(&format!(
                "**{}**{} ({}):\n{}\n\n---\n\n",
                comment.author.login,
                tag,
                comment.created_at.format("%Y-%m-%d %H:%M"),
                comment.body
            ));
        }
    }

    out.push_str("## Your Task\n\n");
    out.push_str(&format!("**Current State**: {}\n\n", ctx.label.name));
    if !ctx.label.instructions.is_empty() {
        out.push_str("### Instructions\n\n");
        out.push_str(&format!("{}\n\n", ctx.label.instructions));
    }
    if !ctx.approval_keywords.is_empty() {
        out.push_str(&format!(
            "Treat a reviewer comment as approval when it contains any of: {}\n\n",
            ctx.approval_keywords.join(", ")
        ));
    }

    let blocked = ctx
        .codebase
        .labels
        .name_of(LabelRole::Blocked)
        .unwrap_or("user:blocked");
    out.push_str("## Important Guidelines\n\n");
    out.push_str(&format!(
        "1. **Label Management**: move the issue between states with\n   `gh issue edit {n} --repo {repo} --remove-label \"<current>\" --add-label \"<next>\"`\n\n",
        n = issue.number,
        repo = repo
    ));
    out.push_str(&format!(
        "2. **Comment Markers**: wrap every comment you post in\n   `{}` ... `{}`\n\n",
        AGENT_MARKER_START, AGENT_MARKER_END
    ));
    out.push_str(&format!(
        "3. **Commits and Pull Requests**: reference #{n} in commit messages and put \"Closes #{n}\" in the PR body\n\n",
        n = issue.number
    ));
    out.push_str(&format!(
        "4. **Getting Stuck**: if you cannot proceed, change the label to `{}` and comment explaining what is blocking you\n\n",
        blocked
    ));

    if !ctx.general_instructions.trim().is_empty() {
        out.push_str("## Additional Instructions\n\n");
        out.push_str(&format!("{}\n", ctx.general_instructions.trim()));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabelsConfig;
    use crate::tracker::{Author, Comment};
    use chrono::{Duration, TimeZone};
    use std::path::PathBuf;

    fn codebase() -> Codebase {
        Codebase {
            name: "widgets".into(),
            repo: "acme/widgets".into(),
            local_path: PathBuf::from("/src/widgets"),
            default_branch: "main".into(),
            enabled: true,
            labels: LabelsConfig::default().resolve(),
        }
    }

    fn comment(i: i64, body: &str) -> Comment {
        Comment {
            author: Author {
                login: "alice".into(),
            },
            body: body.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(i),
        }
    }

    fn render(issue: &Issue, max_comments: usize) -> String {
        let cb = codebase();
        let label = cb.labels.by_role(LabelRole::ReadyToPlan).unwrap().clone();
        let keywords = vec!["lgtm".to_string()];
        build_prompt(&PromptContext {
            codebase: &cb,
            issue,
            label: &label,
            branch: "agent/issue-7",
            workspace: Path::new("/wt/widgets/issue-7"),
            general_instructions: "Be careful.",
            approval_keywords: &keywords,
            max_comments,
        })
    }

    #[test]
    fn test_marker_helpers() {
        let wrapped = wrap_agent_comment("Here is the plan");
        assert!(is_agent_comment(&wrapped));
        assert!(!is_agent_comment("plain comment"));
        assert_eq!(strip_agent_markers(&wrapped), "Here is the plan");
    }

    #[test]
    fn test_prompt_contents() {
        let issue = Issue {
            number: 7,
            title: "Add widget".into(),
            body: "Widgets need a frobnicator.".into(),
            comments: vec![comment(1, &wrap_agent_comment("plan")), comment(2, "looks odd")],
            ..Default::default()
        };
        let prompt = render(&issue, 20);
        assert!(prompt.contains("acme/widgets"));
        assert!(prompt.contains("agent/issue-7"));
        assert!(prompt.contains("Widgets need a frobnicator."));
        assert!(prompt.contains("**alice** (agent)"));
        assert!(prompt.contains("**Current Label**: user:ready-to-plan"));
        assert!(prompt.contains("You are creating an implementation plan"));
        assert!(prompt.contains("Be careful."));
        assert!(prompt.contains("user:blocked"));
        assert!(prompt.contains("lgtm"));
        assert!(!prompt.contains("Showing last"));
    }

    #[test]
    fn test_prompt_truncates_comments() {
        let issue = Issue {
            number: 7,
            comments: (0..25).map(|i| comment(i, &format!("comment-{:02}", i))).collect(),
            ..Default::default()
        };
        let prompt = render(&issue, 20);
        assert!(prompt.contains("Showing last 20 of 25 comments"));
        assert!(!prompt.contains("comment-04"));
        assert!(prompt.contains("comment-05"));
        assert!(prompt.contains("comment-24"));
    }
}
