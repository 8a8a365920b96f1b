//! End-to-end runs of the iteration loop against a real git repository,
//! with the agent and the review host scripted.

use std::time::Duration;

use fdr::core::types::{Budget, BudgetExhausted};
use fdr::io::artifacts::read_or_empty;
use fdr::io::config::Settings;
use fdr::io::github::ReviewHost;
use fdr::io::paths::FdrPaths;
use fdr::io::prompt::PromptEngine;
use fdr::looping;
use fdr::session::{RunState, Session};
use fdr::test_support::{FakeHost, ScriptedAgent, ScriptedTurn, TestRepo, thread};

fn settings() -> Settings {
    Settings {
        check_cmd: "grep -q fixed status.txt".to_string(),
        max_iters: 3,
        max_fix_attempts: 2,
        agent_delay: Duration::ZERO,
        ntfy_enabled: false,
        ..Settings::default()
    }
}

fn run(
    repo: &TestRepo,
    settings: &Settings,
    agent: &ScriptedAgent,
    host: Option<&dyn ReviewHost>,
) -> anyhow::Result<()> {
    let paths = FdrPaths::new(repo.root());
    let prompts = PromptEngine::new().expect("prompts");
    let session = Session {
        settings,
        paths: &paths,
        runner: repo.runner(),
        agent,
        host,
        prompts: &prompts,
    };
    let mut state = RunState::new(paths.fdr_dir.join("session.log"));
    looping::run(&session, &mut state)
}

#[test]
fn one_fix_then_clean_review_succeeds() {
    let repo = TestRepo::new();
    let agent = ScriptedAgent::new(
        repo.root(),
        vec![
            ScriptedTurn::ok().write("status.txt", "fixed\n"),
            ScriptedTurn::ok().write(".fix-die-repeat/review_current.md", "NO_ISSUES\n"),
        ],
    );

    run(&repo, &settings(), &agent, None).expect("run succeeds");

    let paths = FdrPaths::new(repo.root());
    assert!(!paths.review_current.exists());
    assert!(!paths.start_sha.exists());
    assert_eq!(agent.requests().len(), 2);
    let history = read_or_empty(&paths.build_history).expect("build history");
    assert!(history.contains("## Iteration 1 fix attempt 1"));
    let review = read_or_empty(&paths.review).expect("review");
    assert!(review.contains("- No issues found."));
}

#[test]
fn exhausted_fix_attempts_report_the_start_commit() {
    let repo = TestRepo::new();
    let head = repo.git().head_sha().expect("head");
    let agent = ScriptedAgent::new(repo.root(), Vec::new());

    let err = run(&repo, &settings(), &agent, None).expect_err("budget exhausted");

    let exhausted = err.downcast_ref::<BudgetExhausted>().expect("budget error");
    assert_eq!(exhausted.budget, Budget::FixAttempts);
    assert_eq!(exhausted.limit, 2);
    assert_eq!(exhausted.start_sha.as_deref(), Some(head.as_str()));
    assert_eq!(agent.requests().len(), 2);
    assert!(FdrPaths::new(repo.root()).start_sha.exists());
}

#[test]
fn pr_threads_are_only_resolved_while_in_scope() {
    let repo = TestRepo::new();
    repo.write("status.txt", "fixed\n");
    let settings = Settings {
        pr_review: true,
        max_pr_threads: 2,
        ..settings()
    };
    let host = FakeHost::new(vec![
        thread("PRRT_a", "2024-05-03T00:00:00Z", "rename a"),
        thread("PRRT_b", "2024-05-02T00:00:00Z", "rename b"),
        thread("PRRT_c", "2024-05-01T00:00:00Z", "rename c"),
    ]);
    let agent = ScriptedAgent::new(
        repo.root(),
        vec![
            ScriptedTurn::ok()
                .write("status.txt", "fixed v1\n")
                .write(".fix-die-repeat/.resolved_threads", "PRRT_a\nPRRT_c\n"),
            ScriptedTurn::ok()
                .write("status.txt", "fixed v2\n")
                .write(".fix-die-repeat/.resolved_threads", "PRRT_b\nPRRT_c\n"),
        ],
    );

    run(&repo, &settings, &agent, Some(&host)).expect("run succeeds");

    assert_eq!(host.resolve_calls(), vec!["PRRT_a", "PRRT_b", "PRRT_c"]);
    assert_eq!(agent.requests().len(), 2);
    let paths = FdrPaths::new(repo.root());
    let resolved = read_or_empty(&paths.cumulative_resolved).expect("resolved");
    assert_eq!(resolved, "PRRT_a\nPRRT_b\nPRRT_c\n");
}
