//! Built-in defaults for settings, labels and agent instructions.

use crate::labels::{LabelDefinition, LabelOwner, LabelRole, PickupRule};

pub(crate) fn default_poll_interval() -> u64 {
    60
}

pub(crate) fn default_active_poll_interval() -> u64 {
    10
}

pub(crate) fn default_max_concurrent_sessions() -> usize {
    5
}

pub(crate) fn default_output_buffer_lines() -> usize {
    1000
}

pub(crate) fn default_max_prompt_comments() -> usize {
    20
}

pub(crate) fn default_approval_keywords() -> Vec<String> {
    ["approved", "lgtm", "ship it", "merge it", "looks good"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn default_agent_program() -> String {
    "claude".to_string()
}

pub(crate) fn default_agent_args() -> Vec<String> {
    ["--print", "--dangerously-skip-permissions", "--prompt-file", "{prompt_file}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn default_branch() -> String {
    "main".to_string()
}

pub(crate) fn default_true() -> bool {
    true
}

const READY_TO_PLAN_INSTRUCTIONS: &str = "You are creating an implementation plan for this issue.

Steps:
1. Change the label from user:ready-to-plan to ai:planning
2. Analyze the issue requirements thoroughly
3. Write a detailed implementation plan as a comment including:
   - **Summary**: Brief overview of the approach
   - **Files to Modify/Create**: List each file and what changes are needed
   - **Implementation Steps**: Detailed step-by-step instructions
   - **Edge Cases**: Potential issues to handle
   - **Testing Strategy**: How to verify the implementation
4. Wrap your comment with the agent markers
5. Change the label from ai:planning to user:plan-review";

const PLAN_REVIEW_INSTRUCTIONS: &str = "The user has commented on your implementation plan.

Check the user's comment:
- If it approves the plan (see approval keywords):
  -> Change label from user:plan-review to user:ready-to-implement
- If it contains feedback, questions, or change requests:
  -> Change label from user:plan-review to ai:planning
  -> Revise the implementation plan based on the feedback
  -> Add a new comment with the updated plan
  -> Change label from ai:planning to user:plan-review";

const READY_TO_IMPLEMENT_INSTRUCTIONS: &str = "You are implementing an approved plan.

Steps:
1. Change label from user:ready-to-implement to ai:implementing
2. Read the implementation plan from the issue comments
3. Create clean, well-documented code following the plan
4. Follow existing code style and patterns in the repository
5. Write tests as specified in the plan
6. Make atomic commits with clear messages that reference the issue
7. Create a Pull Request whose body links the issue (Closes #N)
8. Change label from ai:implementing to user:code-review";

const CODE_REVIEW_INSTRUCTIONS: &str = "The user has commented on your Pull Request.

Check the user's comment or review:
- If it approves the change (see approval keywords):
  -> Merge the PR using: gh pr merge {number} --merge --delete-branch
  -> Change label from user:code-review to ai:done
  -> Add a closing comment summarizing what was implemented
- If it contains change requests or feedback:
  -> Change label from user:code-review to ai:implementing
  -> Address each review comment specifically
  -> Push new commits with clear messages
  -> Change label from ai:implementing to user:code-review
  -> Reply to review comments explaining your changes";

const CI_FAILED_INSTRUCTIONS: &str = "The CI pipeline has failed. You need to fix it.

Steps:
1. Change label from ai:ci-failed to ai:implementing
2. Fetch and analyze the CI logs using: gh run view --log-failed
3. Identify the cause of failure (test failures, build errors, lint errors)
4. Fix the issues in your code
5. Commit with a clear message referencing the issue
6. Push the fix
7. Change label to user:code-review

Do NOT change unrelated code. Focus only on fixing the CI failure.";

pub(crate) const GENERAL_INSTRUCTIONS: &str = "You are a developer working on tracker issues through the dev-swarm orchestrator.

- Follow existing code style in the repository
- Write clear, maintainable code
- Add comments for complex logic
- Write tests when specified in the plan";

/// The built-in definition for a role.
pub fn default_label(role: LabelRole) -> LabelDefinition {
    let (name, color, description, owner, pickup, instructions) = match role {
        LabelRole::ReadyToPlan => (
            "user:ready-to-plan",
            "0052CC",
            "Ready for the agent to create an implementation plan",
            LabelOwner::User,
            PickupRule::Always,
            READY_TO_PLAN_INSTRUCTIONS,
        ),
        LabelRole::PlanReview => (
            "user:plan-review",
            "0052CC",
            "Implementation plan ready for user review",
            LabelOwner::User,
            PickupRule::OnNewUserInput,
            PLAN_REVIEW_INSTRUCTIONS,
        ),
        LabelRole::ReadyToImplement => (
            "user:ready-to-implement",
            "0052CC",
            "Plan approved, ready for the agent to implement",
            LabelOwner::User,
            PickupRule::Always,
            READY_TO_IMPLEMENT_INSTRUCTIONS,
        ),
        LabelRole::CodeReview => (
            "user:code-review",
            "0052CC",
            "PR created, awaiting user code review",
            LabelOwner::User,
            PickupRule::OnNewUserInput,
            CODE_REVIEW_INSTRUCTIONS,
        ),
        LabelRole::Blocked => (
            "user:blocked",
            "D93F0B",
            "Agent is stuck and needs human intervention",
            LabelOwner::User,
            PickupRule::Never,
            "",
        ),
        LabelRole::Planning => (
            "ai:planning",
            "FBCA04",
            "Agent is writing the implementation plan",
            LabelOwner::Agent,
            PickupRule::Never,
            "",
        ),
        LabelRole::Implementing => (
            "ai:implementing",
            "FBCA04",
            "Agent is actively writing code",
            LabelOwner::Agent,
            PickupRule::Never,
            "",
        ),
        LabelRole::CiFailed => (
            "ai:ci-failed",
            "D93F0B",
            "CI failed, the agent will analyze and fix",
            LabelOwner::Agent,
            PickupRule::Always,
            CI_FAILED_INSTRUCTIONS,
        ),
        LabelRole::Done => (
            "ai:done",
            "0E8A16",
            "Complete - PR merged",
            LabelOwner::Agent,
            PickupRule::Never,
            "",
        ),
    };

    LabelDefinition {
        role,
        name: name.to_string(),
        color: color.to_string(),
        description: description.to_string(),
        owner,
        pickup,
        instructions: instructions.to_string(),
    }
}
