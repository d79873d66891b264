//! A labelled issue is picked up, worked in its own git worktree, and cleaned
//! up once it is done.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use swarm_core::config::AgentCommand;
use swarm_core::orchestrator::StateEvent;
use swarm_core::testing::{FakeTracker, codebase_config, sample_issue, test_config};
use swarm_core::{GitWorkspaces, Orchestrator, SessionStatus};

const REPO: &str = "acme/widgets";

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
        .args(args)
        .output()
        .unwrap();
    assert!(output.status.success(), "git {:?} failed", args);
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn init_repo(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "-q"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    std::fs::write(dir.join("README.md"), "widgets\n").unwrap();
    git(dir, &["add", "README.md"]);
    git(dir, &["commit", "-q", "-m", "initial"]);
}

#[tokio::test]
async fn test_issue_lifecycle_from_pickup_to_done() {
    let dir = tempfile::tempdir().unwrap();
    let checkout = dir.path().join("src").join("widgets");
    init_repo(&checkout);

    let mut config = test_config(dir.path());
    config.settings.agent = AgentCommand {
        program: "sh".into(),
        args: vec!["-c".into(), "sleep 0.2; exit 0".into()],
    };
    config.codebases.push(codebase_config(REPO, &checkout));

    let tracker = Arc::new(FakeTracker::new());
    tracker.add_issue(REPO, sample_issue(7, &["user:ready-to-plan"]));

    let orch = Orchestrator::new(config, tracker.clone(), Arc::new(GitWorkspaces::new()));
    let mut updates = orch.subscribe().unwrap();

    // First tick: tracked, picked up, workspace created on the agent branch.
    orch.poll_once().await;

    let workspace = dir.path().join("worktrees").join("widgets").join("issue-7");
    let session = orch.session("acme/widgets#7").await.expect("session spawned");
    assert_eq!(session.workspace(), workspace);
    assert_eq!(session.branch(), "agent/issue-7");
    assert!(workspace.join(".dev-swarm-prompt.md").is_file());
    assert_eq!(
        git(&workspace, &["rev-parse", "--abbrev-ref", "HEAD"]),
        "agent/issue-7"
    );

    let mut saw_found = false;
    let mut saw_started = false;
    while let Ok(update) = updates.try_recv() {
        match update.event {
            StateEvent::IssueFound { issue: 7, .. } => saw_found = true,
            StateEvent::SessionStarted { issue: 7, .. } => saw_started = true,
            _ => {}
        }
    }
    assert!(saw_found && saw_started);

    // The agent exits 0 and, as its last act, marks the issue done.
    for _ in 0..400 {
        if session.status().is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(session.status(), SessionStatus::Completed);
    assert_eq!(session.exit_code(), Some(0));
    tracker.set_labels(REPO, 7, &["ai:done"]);

    // Next tick: drained, and the workspace of the finished issue is removed.
    orch.poll_once().await;

    assert!(!orch.session_manager().has_session("acme/widgets#7").await);
    assert!(!workspace.exists());
    assert_eq!(orch.stats().await.total_issues, 0);
}
