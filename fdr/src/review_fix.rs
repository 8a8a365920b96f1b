//! Fixing the issues a review reported.

use anyhow::Result;
use tracing::{error, info};

use crate::io::agent::{AgentRequest, FIX_TOOLS};
use crate::io::changes::TreeSnapshot;
use crate::pr::{self, ResolveOutcome};
use crate::session::{RunState, Session};

/// Lines of review history attached as recent context.
pub const RECENT_REVIEW_LINES: usize = 50;

/// How the review-fix loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewFixOutcome {
    /// The tree changed; the next iteration re-runs the checks.
    Applied,
    /// Every in-scope PR thread is resolved on the host.
    AllThreadsResolved,
    /// No attempt changed anything.
    Unchanged,
}

/// Ask the agent to fix `review_current.md`, retrying no-op attempts.
///
/// Exhausting `max_review_fix_attempts` is not fatal: the outer loop moves
/// on to the next iteration.
pub fn fix_review_issues(session: &Session<'_>, state: &mut RunState) -> Result<ReviewFixOutcome> {
    let max = session.settings.max_review_fix_attempts;
    for attempt in 1..=max {
        if attempt > 1 {
            info!("Retrying fix (attempt {attempt})...");
        }
        if let Some(outcome) = run_review_fix_attempt(session, state, attempt)? {
            return Ok(outcome);
        }
    }
    error!(
        "Review fixes changed no files after {max} attempt(s). Continuing to the next iteration."
    );
    Ok(ReviewFixOutcome::Unchanged)
}

/// One attempt. `None` means the tree did not change and a retry is due.
fn run_review_fix_attempt(
    session: &Session<'_>,
    state: &mut RunState,
    attempt: u32,
) -> Result<Option<ReviewFixOutcome>> {
    let settings = session.settings;
    let paths = session.paths;
    let store = session.store();
    let git = session.git();

    info!(
        "[Step 6A] {} fix attempt {attempt} of {}...",
        settings.agent_program, settings.max_review_fix_attempts
    );
    let mut request = AgentRequest::new(String::new())
        .tools(FIX_TOOLS)
        .model(settings.model.as_deref())
        .attach(paths.relative(&paths.review_current));
    let has_recent = store.write_recent_review(RECENT_REVIEW_LINES)?;
    if has_recent {
        request = request.attach(paths.relative(&paths.review_recent));
    }
    request.prompt = session
        .prompts
        .resolve_review_issues(settings.pr_review, has_recent)?;

    let before = TreeSnapshot::capture(&git);
    let reply = session.invoke_agent(state, &request)?;
    if !reply.success() {
        error!("{} fix failed on attempt {attempt}", settings.agent_program);
    }
    let after = TreeSnapshot::capture(&git);
    store.record_resolution_pending(state.iteration, attempt)?;

    // Compared with the pre-call snapshot, so edits left over from earlier
    // attempts do not count as progress.
    if !after.changed_since(&before) {
        state.note_toolless_attempt();
        error!(
            "{} ran but no files changed while fixing review issues (attempt {attempt}).",
            settings.agent_program
        );
        store.record_fix_noop(state.iteration, attempt)?;
        return Ok(None);
    }

    state.toolless_attempts = 0;
    let stat = git.diff_stat().unwrap_or_default();
    store.record_review_fix_applied(state.iteration, attempt, &stat)?;

    if settings.pr_review && pr::resolve_threads(session, state)? == ResolveOutcome::AllResolved {
        return Ok(Some(ReviewFixOutcome::AllThreadsResolved));
    }
    Ok(Some(ReviewFixOutcome::Applied))
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::io::artifacts::{read_or_empty, write_file};
    use crate::io::config::Settings;
    use crate::io::paths::FdrPaths;
    use crate::io::prompt::PromptEngine;
    use crate::test_support::{FakeHost, ScriptedAgent, ScriptedTurn, TestRepo, thread};

    fn settings(pr_review: bool) -> Settings {
        Settings {
            check_cmd: "true".to_string(),
            max_review_fix_attempts: 2,
            pr_review,
            agent_delay: Duration::ZERO,
            ..Settings::default()
        }
    }

    fn state() -> RunState {
        let mut state = RunState::new("session.log".into());
        state.iteration = 2;
        state
    }

    #[test]
    fn applied_fix_is_recorded() {
        let repo = TestRepo::new();
        let paths = FdrPaths::new(repo.root());
        paths.ensure_state_dir().expect("state dir");
        write_file(&paths.review_current, "[MAJOR] status.txt:1 says broken\n").expect("write");
        let settings = settings(false);
        let prompts = PromptEngine::new().expect("prompts");
        let agent = ScriptedAgent::new(
            repo.root(),
            vec![ScriptedTurn::ok().write("status.txt", "fixed\n")],
        );
        let session = Session {
            settings: &settings,
            paths: &paths,
            runner: repo.runner(),
            agent: &agent,
            host: None,
            prompts: &prompts,
        };
        let mut state = state();

        let outcome = fix_review_issues(&session, &mut state).expect("fix");

        assert_eq!(outcome, ReviewFixOutcome::Applied);
        let request = &agent.requests()[0];
        assert_eq!(request.tools.as_deref(), Some(FIX_TOOLS));
        assert!(request.is_attached(Path::new(".fix-die-repeat/review_current.md")));
        let history = read_or_empty(&paths.build_history).expect("history");
        assert!(history.contains("status.txt"));
        assert_eq!(state.toolless_attempts, 0);
    }

    #[test]
    fn unchanged_tree_retries_until_the_cap() {
        let repo = TestRepo::new();
        let paths = FdrPaths::new(repo.root());
        paths.ensure_state_dir().expect("state dir");
        write_file(&paths.review_current, "[MINOR] rename x\n").expect("write");
        let settings = settings(false);
        let prompts = PromptEngine::new().expect("prompts");
        let agent = ScriptedAgent::new(repo.root(), Vec::new());
        let session = Session {
            settings: &settings,
            paths: &paths,
            runner: repo.runner(),
            agent: &agent,
            host: None,
            prompts: &prompts,
        };
        let mut state = state();

        let outcome = fix_review_issues(&session, &mut state).expect("fix");

        assert_eq!(outcome, ReviewFixOutcome::Unchanged);
        assert_eq!(agent.requests().len(), 2);
        assert_eq!(state.toolless_attempts, 2);
        let history = read_or_empty(&paths.build_history).expect("history");
        assert_eq!(
            history.matches("FAILED to apply fixes (no files changed)").count(),
            2
        );
    }

    #[test]
    fn resolving_every_thread_ends_the_loop() {
        let repo = TestRepo::new();
        let paths = FdrPaths::new(repo.root());
        paths.ensure_state_dir().expect("state dir");
        write_file(&paths.review_current, "ID: PRRT_1\nrename x\n").expect("write");
        write_file(&paths.pr_thread_ids, "PRRT_1\n").expect("write");
        let settings = settings(true);
        let prompts = PromptEngine::new().expect("prompts");
        let agent = ScriptedAgent::new(
            repo.root(),
            vec![
                ScriptedTurn::ok()
                    .write("status.txt", "fixed\n")
                    .write(".fix-die-repeat/.resolved_threads", "PRRT_1\n"),
            ],
        );
        let host = FakeHost::new(vec![thread("PRRT_1", "2024-05-01T00:00:00Z", "rename x")]);
        let session = Session {
            settings: &settings,
            paths: &paths,
            runner: repo.runner(),
            agent: &agent,
            host: Some(&host),
            prompts: &prompts,
        };

        let outcome = fix_review_issues(&session, &mut state()).expect("fix");

        assert_eq!(outcome, ReviewFixOutcome::AllThreadsResolved);
        assert_eq!(host.resolve_calls(), vec!["PRRT_1"]);
    }
}
