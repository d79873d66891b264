//! Pickup decision.
//!
//! Agent authorship is decided by the comment marker, not the tracker author:
//! the agent posts under a regular user account.

use chrono::{DateTime, Utc};

use crate::labels::PickupRule;
use crate::session::is_agent_comment;
use crate::tracker::{Issue, PrComment, PrReview};

/// True when the newest human entry is strictly newer than the newest agent entry.
///
/// Entries are `(body, created_at)`. With no human entry the answer is false.
pub fn has_new_user_input<'a, I>(entries: I) -> bool
where
    I: IntoIterator<Item = (&'a str, DateTime<Utc>)>,
{
    let mut last_agent: Option<DateTime<Utc>> = None;
    let mut last_user: Option<DateTime<Utc>> = None;

    for (body, at) in entries {
        let slot = if is_agent_comment(body) {
            &mut last_agent
        } else {
            &mut last_user
        };
        if slot.is_none_or(|t| at > t) {
            *slot = Some(at);
        }
    }

    match (last_user, last_agent) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(user), Some(agent)) => user > agent,
    }
}

/// Issue comments contain newer human input than agent input.
pub fn issue_has_new_user_input(issue: &Issue) -> bool {
    has_new_user_input(
        issue
            .comments
            .iter()
            .map(|c| (c.body.as_str(), c.created_at)),
    )
}

/// Pull request comments and reviews contain newer human input than agent input.
pub fn pr_has_new_user_input(comments: &[PrComment], reviews: &[PrReview]) -> bool {
    let comments = comments.iter().map(|c| (c.body.as_str(), c.created_at));
    let reviews = reviews
        .iter()
        .filter_map(|r| r.submitted_at.map(|at| (r.body.as_str(), at)));
    has_new_user_input(comments.chain(reviews))
}

/// Whether a label's rule allows pickup, given whether there is new human input.
///
/// Session uniqueness and capacity are checked separately by the caller.
pub fn rule_allows(rule: PickupRule, new_user_input: bool) -> bool {
    match rule {
        PickupRule::Always => true,
        PickupRule::Never => false,
        PickupRule::OnNewUserInput => new_user_input,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::wrap_agent_comment;
    use crate::testing::{comment, sample_issue};
    use crate::tracker::Author;
    use chrono::{Duration, TimeZone};

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn agent(body: &str) -> String {
        wrap_agent_comment(body)
    }

    #[test]
    fn test_user_after_agent_picks_up() {
        let mut issue = sample_issue(1, &[]);
        issue.comments = vec![comment("bot", &agent("plan"), t(1)), comment("alice", "change X", t(2))];
        assert!(issue_has_new_user_input(&issue));
    }

    #[test]
    fn test_agent_after_user_does_not() {
        let mut issue = sample_issue(1, &[]);
        issue.comments = vec![comment("alice", "please plan", t(1)), comment("bot", &agent("plan"), t(2))];
        assert!(!issue_has_new_user_input(&issue));
    }

    #[test]
    fn test_no_comments_or_only_agent() {
        let mut issue = sample_issue(1, &[]);
        assert!(!issue_has_new_user_input(&issue));

        issue.comments = vec![comment("bot", &agent("a"), t(1)), comment("bot", &agent("b"), t(2))];
        assert!(!issue_has_new_user_input(&issue));
    }

    #[test]
    fn test_equal_timestamps_not_newer() {
        let mut issue = sample_issue(1, &[]);
        issue.comments = vec![comment("bot", &agent("plan"), t(5)), comment("alice", "ok", t(5))];
        assert!(!issue_has_new_user_input(&issue));
    }

    #[test]
    fn test_only_user_comment_picks_up() {
        let mut issue = sample_issue(1, &[]);
        issue.comments = vec![comment("alice", "hello", t(1))];
        assert!(issue_has_new_user_input(&issue));
    }

    #[test]
    fn test_pr_reviews_count_as_input() {
        let comments = vec![PrComment {
            author: Author::default(),
            body: agent("pushed fixes"),
            created_at: t(1),
        }];
        let reviews = vec![
            PrReview {
                author: Author::default(),
                body: "please rename".into(),
                state: "CHANGES_REQUESTED".into(),
                submitted_at: Some(t(2)),
            },
            PrReview {
                author: Author::default(),
                body: "pending".into(),
                state: "PENDING".into(),
                submitted_at: None,
            },
        ];
        assert!(pr_has_new_user_input(&comments, &reviews));
        assert!(!pr_has_new_user_input(&comments, &[]));
    }

    #[test]
    fn test_rule_allows() {
        assert!(rule_allows(PickupRule::Always, false));
        assert!(!rule_allows(PickupRule::Never, true));
        assert!(rule_allows(PickupRule::OnNewUserInput, true));
        assert!(!rule_allows(PickupRule::OnNewUserInput, false));
    }
}
