//! Label definitions: the closed state space an issue moves through.
//!
//! Every tracked issue is in at most one state, expressed as a tracker label.
//! Each state carries a pickup rule deciding when the agent is invoked.

use serde::{Deserialize, Serialize};

use crate::tracker::Issue;

/// The fixed set of workflow states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelRole {
    ReadyToPlan,
    PlanReview,
    ReadyToImplement,
    CodeReview,
    Blocked,
    Planning,
    Implementing,
    CiFailed,
    Done,
}

impl LabelRole {
    /// All roles in workflow order.
    pub const ALL: [LabelRole; 9] = [
        LabelRole::ReadyToPlan,
        LabelRole::PlanReview,
        LabelRole::ReadyToImplement,
        LabelRole::CodeReview,
        LabelRole::Blocked,
        LabelRole::Planning,
        LabelRole::Implementing,
        LabelRole::CiFailed,
        LabelRole::Done,
    ];

    /// Key used for this role in the config file (`[labels.<key>]`).
    pub fn config_key(&self) -> &'static str {
        match self {
            LabelRole::ReadyToPlan => "ready_to_plan",
            LabelRole::PlanReview => "plan_review",
            LabelRole::ReadyToImplement => "ready_to_implement",
            LabelRole::CodeReview => "code_review",
            LabelRole::Blocked => "blocked",
            LabelRole::Planning => "planning",
            LabelRole::Implementing => "implementing",
            LabelRole::CiFailed => "ci_failed",
            LabelRole::Done => "done",
        }
    }
}

/// Who is expected to act while an issue is in a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelOwner {
    #[default]
    User,
    #[serde(alias = "ai")]
    Agent,
}

/// When the agent should be invoked for an issue carrying a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickupRule {
    Always,
    #[default]
    Never,
    #[serde(alias = "on_user_comment")]
    OnNewUserInput,
}

impl PickupRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickupRule::Always => "always",
            PickupRule::Never => "never",
            PickupRule::OnNewUserInput => "on_new_user_input",
        }
    }
}

/// A resolved label definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelDefinition {
    pub role: LabelRole,
    pub name: String,
    pub color: String,
    pub description: String,
    pub owner: LabelOwner,
    pub pickup: PickupRule,
    /// Prompt text handed to the agent; opaque to the orchestrator.
    pub instructions: String,
}

/// Ordered, resolved collection of label definitions for one codebase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<LabelDefinition>,
}

impl LabelSet {
    pub fn new(labels: Vec<LabelDefinition>) -> Self {
        Self { labels }
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabelDefinition> {
        self.labels.iter()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Look up a definition by its tracker label name.
    pub fn by_name(&self, name: &str) -> Option<&LabelDefinition> {
        self.labels.iter().find(|l| l.name == name)
    }

    /// Look up the definition for a workflow role.
    pub fn by_role(&self, role: LabelRole) -> Option<&LabelDefinition> {
        self.labels.iter().find(|l| l.role == role)
    }

    /// Name of the label for a role, if defined.
    pub fn name_of(&self, role: LabelRole) -> Option<&str> {
        self.by_role(role).map(|l| l.name.as_str())
    }

    /// Whether `name` is the label for `role`.
    pub fn is_role(&self, name: &str, role: LabelRole) -> bool {
        self.name_of(role) == Some(name)
    }

    /// Definitions whose pickup rule is not `never`.
    pub fn pickup_labels(&self) -> Vec<&LabelDefinition> {
        self.labels
            .iter()
            .filter(|l| l.pickup != PickupRule::Never)
            .collect()
    }

    /// Names of all pickup-eligible labels, used for the tracker query.
    pub fn pickup_label_names(&self) -> Vec<String> {
        self.pickup_labels()
            .into_iter()
            .map(|l| l.name.clone())
            .collect()
    }

    /// The state an issue is currently in: the first of its labels that names
    /// a definition. Several state labels at once is a tracker-side data error;
    /// the first one wins.
    pub fn current_label<'a>(&'a self, issue: &Issue) -> Option<&'a LabelDefinition> {
        issue.labels.iter().find_map(|l| self.by_name(&l.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabelsConfig;
    use crate::tracker::IssueLabel;

    fn issue_with_labels(names: &[&str]) -> Issue {
        Issue {
            number: 1,
            title: "t".into(),
            labels: names
                .iter()
                .map(|n| IssueLabel {
                    name: n.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_pickup_labels_exclude_never() {
        let set = LabelsConfig::default().resolve();
        let names = set.pickup_label_names();
        assert_eq!(
            names,
            vec![
                "user:ready-to-plan",
                "user:plan-review",
                "user:ready-to-implement",
                "user:code-review",
                "ai:ci-failed",
            ]
        );
    }

    #[test]
    fn test_current_label_first_match_wins() {
        let set = LabelsConfig::default().resolve();
        let issue = issue_with_labels(&["bug", "user:plan-review", "ai:done"]);
        let current = set.current_label(&issue).unwrap();
        assert_eq!(current.role, LabelRole::PlanReview);

        let untracked = issue_with_labels(&["bug", "enhancement"]);
        assert!(set.current_label(&untracked).is_none());
    }

    #[test]
    fn test_role_lookup() {
        let set = LabelsConfig::default().resolve();
        assert_eq!(set.name_of(LabelRole::Done), Some("ai:done"));
        assert!(set.is_role("ai:ci-failed", LabelRole::CiFailed));
        assert!(!set.is_role("ai:ci-failed", LabelRole::Implementing));
    }

    #[test]
    fn test_pickup_rule_alias() {
        #[derive(Deserialize)]
        struct Wrapper {
            rule: PickupRule,
            owner: LabelOwner,
        }
        let w: Wrapper = toml::from_str("rule = \"on_user_comment\"\nowner = \"ai\"").unwrap();
        assert_eq!(w.rule, PickupRule::OnNewUserInput);
        assert_eq!(w.owner, LabelOwner::Agent);
    }
}
