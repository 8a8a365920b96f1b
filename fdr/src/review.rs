//! Review phase: PR threads or a local diff review, then the verdict.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::core::context::choose_mode;
use crate::core::exclude::{is_excluded_file, is_state_path};
use crate::core::lang;
use crate::core::ruff_policy::{PROHIBITED_RUFF_RULES, find_prohibited_ignores};
use crate::core::types::{ContextMode, PolicyViolation};
use crate::core::verdict::{self, NO_ISSUES_MARKER, Verdict};
use crate::io::agent::{AgentRequest, REVIEW_TOOLS};
use crate::io::artifacts::{has_content, read_or_empty, remove_file, write_file};
use crate::io::changes::{changed_files, untracked_file_diff};
use crate::pr;
use crate::session::{RunState, Session};

/// Whether the review left anything to fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewOutcome {
    NoIssues,
    IssuesFound,
}

/// Produce `review_current.md` for this iteration and interpret it.
pub fn run_review_phase(session: &Session<'_>, state: &mut RunState) -> Result<ReviewOutcome> {
    let paths = session.paths;
    info!("[Step 3] Preparing review artifacts...");
    remove_file(&paths.review_current)?;

    if session.settings.pr_review {
        pr::fetch_threads(session, state)?;
    }

    if has_content(&paths.review_current) {
        info!(
            "[Step 4] Using PR threads from {} for review.",
            paths.relative(&paths.review_current)
        );
        info!("[Step 5] Skipping local file review generation.");
    } else {
        run_local_review(session, state)?;
    }

    process_results(session)
}

/// Diff the tree against the run's starting commit and ask the agent to review it.
pub fn run_local_review(session: &Session<'_>, state: &mut RunState) -> Result<()> {
    let settings = session.settings;
    let paths = session.paths;
    let store = session.store();
    let git = session.git();

    info!("[Step 4] Collecting changed and staged files...");
    let files = changed_files(&git);
    if files.is_empty() {
        info!("No changed or staged files found to review. Checks passed. Skipping review.");
        write_file(&paths.review_current, NO_ISSUES_MARKER)?;
        write_file(&paths.diff, "")?;
        store.record_review(state.iteration, "")?;
        return Ok(());
    }
    info!("[Step 4] Found {} file(s) to review", files.len());

    info!("[Step 5] Generating diff for review...");
    let diff = review_diff(session, state.start_sha.as_deref());
    write_file(&paths.diff, &diff)?;
    let size = diff.len() as u64;
    info!("Generated review diff size: {size} bytes");

    let diff_rel = paths.relative(&paths.diff);
    let mut request = AgentRequest::new(String::new())
        .tools(REVIEW_TOOLS)
        .model(settings.model.as_deref());
    let prefix = match choose_mode(size, settings.auto_attach_threshold) {
        ContextMode::Pull => {
            info!("Review diff size exceeds threshold. Switching to PULL mode.");
            format!(
                "The changes are too large to attach automatically ({size} bytes). You MUST use \
                 the 'read' tool to inspect '{diff_rel}'."
            )
        }
        ContextMode::Push => {
            info!("Review diff size ({size} bytes) is within limits. Attaching {diff_rel}.");
            request = request.attach(diff_rel.clone());
            format!("I have attached '{diff_rel}' which contains the changes made in this session.")
        }
    };
    if paths.review.exists() {
        request = request.attach(paths.relative(&paths.review));
    }

    let languages: Vec<String> = lang::resolve(&files, settings.languages.as_deref())
        .into_iter()
        .collect();
    let has_agents_file = paths.root.join("AGENTS.md").exists();
    request.prompt = session
        .prompts
        .local_review(&prefix, has_agents_file, &languages)?;

    info!("[Step 5] Running {} to review files...", settings.agent_program);
    let reply = session.invoke_agent(state, &request)?;
    if !reply.success() {
        info!(
            "{} review failed. Treating as no issues found.",
            settings.agent_program
        );
        write_file(&paths.review_current, NO_ISSUES_MARKER)?;
    }

    store.record_review(state.iteration, &read_or_empty(&paths.review_current)?)
}

/// `git diff <start>` plus a pseudo-diff for every untracked file.
///
/// A failed diff degrades to an empty one so the review still sees new files.
pub fn review_diff(session: &Session<'_>, start_sha: Option<&str>) -> String {
    let git = session.git();
    let mut diff = git.diff(start_sha).unwrap_or_else(|err| {
        warn!("git diff failed; reviewing untracked files only: {err:#}");
        String::new()
    });
    let untracked = git.untracked_files().unwrap_or_default();
    for path in untracked
        .iter()
        .filter(|p| !is_state_path(p) && !is_excluded_file(p))
        .filter(|p| session.paths.root.join(p).is_file())
    {
        diff.push_str(&untracked_file_diff(&session.paths.root, path));
    }
    diff
}

/// Interpret `review_current.md`. A missing file counts as no issues.
///
/// Fails with [`PolicyViolation`] before looking at the review when the
/// project silences a prohibited ruff rule.
pub fn process_results(session: &Session<'_>) -> Result<ReviewOutcome> {
    let paths = session.paths;
    let current = paths.relative(&paths.review_current);
    info!("[Step 6] Processing review results...");
    enforce_ruff_policy(&paths.root)?;

    if !paths.review_current.exists() {
        warn!("{current} was not created by the review. Treating as no issues found.");
        return Ok(ReviewOutcome::NoIssues);
    }

    match verdict::interpret(&read_or_empty(&paths.review_current)?) {
        Verdict::IssuesFound => {
            info!(
                "[Step 6A] Issues found in {current}. Running {} to fix them...",
                session.settings.agent_program
            );
            Ok(ReviewOutcome::IssuesFound)
        }
        Verdict::EmptyNoIssues => {
            warn!(
                "{current} is empty; expected '{NO_ISSUES_MARKER}' marker. Treating as no \
                 issues, but this may indicate a problem."
            );
            info!("[Step 6B] No issues found in {current}.");
            Ok(ReviewOutcome::NoIssues)
        }
        Verdict::NoIssues => {
            info!("[Step 6B] No issues found in {current}.");
            Ok(ReviewOutcome::NoIssues)
        }
    }
}

/// Stop the run when `pyproject.toml` ignores a prohibited ruff rule or
/// cannot be parsed. A project without `pyproject.toml` passes.
pub fn enforce_ruff_policy(root: &Path) -> Result<()> {
    let pyproject = root.join("pyproject.toml");
    if !pyproject.is_file() {
        return Ok(());
    }
    let text =
        fs::read_to_string(&pyproject).with_context(|| format!("read {}", pyproject.display()))?;
    let separator = "=".repeat(70);

    let violations = match find_prohibited_ignores(&text) {
        Ok(violations) => violations,
        Err(err) => {
            let violation = PolicyViolation::UnparseableRuffConfig {
                path: pyproject,
                message: err.message().to_string(),
            };
            error!("{separator}");
            error!("CRITICAL: Failed to parse ruff config!");
            error!("{violation}");
            error!("This is a CRITICAL policy violation. The build cannot continue.");
            return Err(violation.into());
        }
    };
    if violations.is_empty() {
        return Ok(());
    }

    error!("{separator}");
    error!("CRITICAL: Prohibited ruff rules found in per-file-ignores!");
    error!("{separator}");
    error!("The following rules MUST NEVER be ignored (see AGENTS.md):");
    for rule in PROHIBITED_RUFF_RULES {
        error!("  - {rule}: NEVER IGNORE");
    }
    error!("Violations found:");
    for (pattern, rules) in &violations {
        error!("  {pattern}:");
        for rule in rules {
            error!("    - {rule}");
        }
    }
    error!("To fix:");
    error!("  1. Remove the ignore from pyproject.toml");
    error!("  2. Refactor the code to address the underlying issue");
    error!("This is a CRITICAL policy violation. The build cannot continue.");
    Err(PolicyViolation::ProhibitedRuffIgnores(violations).into())
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::io::config::Settings;
    use crate::io::paths::FdrPaths;
    use crate::io::prompt::PromptEngine;
    use crate::test_support::{FakeHost, ScriptedAgent, ScriptedTurn, TestRepo, thread};

    fn settings() -> Settings {
        Settings {
            check_cmd: "true".to_string(),
            agent_delay: Duration::ZERO,
            ..Settings::default()
        }
    }

    fn state() -> RunState {
        let mut state = RunState::new("session.log".into());
        state.iteration = 1;
        state
    }

    #[test]
    fn local_review_attaches_diff_and_reads_marker() {
        let repo = TestRepo::new();
        let paths = FdrPaths::new(repo.root());
        paths.ensure_state_dir().expect("state dir");
        repo.write("status.txt", "fixed\n");
        repo.write("notes/new.md", "hello\n");
        let settings = settings();
        let prompts = PromptEngine::new().expect("prompts");
        let agent = ScriptedAgent::new(
            repo.root(),
            vec![ScriptedTurn::ok().write(".fix-die-repeat/review_current.md", "NO_ISSUES")],
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

        let outcome = run_review_phase(&session, &mut state).expect("review");

        assert_eq!(outcome, ReviewOutcome::NoIssues);
        let request = &agent.requests()[0];
        assert_eq!(request.tools.as_deref(), Some(REVIEW_TOOLS));
        assert!(request.is_attached(Path::new(".fix-die-repeat/changes.diff")));
        let diff = read_or_empty(&paths.diff).expect("diff");
        assert!(diff.contains("+fixed"));
        assert!(diff.contains("+++ b/notes/new.md\n+hello\n"));
        let history = read_or_empty(&paths.review).expect("review");
        assert!(history.starts_with("## Iteration 1 - Review ("));
    }

    #[test]
    fn failed_review_is_treated_as_clean() {
        let repo = TestRepo::new();
        let paths = FdrPaths::new(repo.root());
        paths.ensure_state_dir().expect("state dir");
        repo.write("status.txt", "fixed\n");
        let settings = settings();
        let prompts = PromptEngine::new().expect("prompts");
        let agent = ScriptedAgent::new(
            repo.root(),
            vec![ScriptedTurn::fail("boom"), ScriptedTurn::fail("boom")],
        );
        let session = Session {
            settings: &settings,
            paths: &paths,
            runner: repo.runner(),
            agent: &agent,
            host: None,
            prompts: &prompts,
        };

        let outcome = run_review_phase(&session, &mut state()).expect("review");

        assert_eq!(outcome, ReviewOutcome::NoIssues);
        assert_eq!(
            read_or_empty(&paths.review_current).expect("current"),
            NO_ISSUES_MARKER
        );
    }

    #[test]
    fn pending_pr_threads_skip_local_review() {
        let repo = TestRepo::new();
        let paths = FdrPaths::new(repo.root());
        paths.ensure_state_dir().expect("state dir");
        let settings = Settings {
            pr_review: true,
            ..settings()
        };
        let prompts = PromptEngine::new().expect("prompts");
        let agent = ScriptedAgent::new(repo.root(), Vec::new());
        let host = FakeHost::new(vec![thread("PRRT_1", "2024-05-01T00:00:00Z", "rename x")]);
        let session = Session {
            settings: &settings,
            paths: &paths,
            runner: repo.runner(),
            agent: &agent,
            host: Some(&host),
            prompts: &prompts,
        };

        let outcome = run_review_phase(&session, &mut state()).expect("review");

        assert_eq!(outcome, ReviewOutcome::IssuesFound);
        assert!(agent.requests().is_empty());
        assert!(
            read_or_empty(&paths.review_current)
                .expect("current")
                .contains("ID: PRRT_1")
        );
    }

    #[test]
    fn missing_review_output_counts_as_clean() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = FdrPaths::new(dir.path());
        let settings = settings();
        let prompts = PromptEngine::new().expect("prompts");
        let runner = crate::test_support::FakeRunner::new();
        let agent = ScriptedAgent::new(dir.path(), Vec::new());
        let session = Session {
            settings: &settings,
            paths: &paths,
            runner: &runner,
            agent: &agent,
            host: None,
            prompts: &prompts,
        };
        assert_eq!(process_results(&session).expect("process"), ReviewOutcome::NoIssues);

        write_file(&paths.review_current, "[MAJOR] src/lib.rs:3 leaks a handle\n").expect("write");
        assert_eq!(
            process_results(&session).expect("process"),
            ReviewOutcome::IssuesFound
        );
    }

    #[test]
    fn ruff_policy_passes_without_pyproject_or_with_allowed_ignores() {
        let dir = tempfile::tempdir().expect("tempdir");
        enforce_ruff_policy(dir.path()).expect("no pyproject");

        std::fs::write(
            dir.path().join("pyproject.toml"),
            "[tool.ruff.lint.per-file-ignores]\n\"tests/*\" = [\"S101\"]\n",
        )
        .expect("write");
        enforce_ruff_policy(dir.path()).expect("allowed ignores");
    }

    #[test]
    fn prohibited_ruff_ignore_stops_review_processing() {
        let repo = TestRepo::new();
        repo.write(
            "pyproject.toml",
            "[tool.ruff.lint.per-file-ignores]\n\"src/app.py\" = [\"C901\", \"E501\"]\n",
        );
        let paths = FdrPaths::new(repo.root());
        paths.ensure_state_dir().expect("state dir");
        write_file(&paths.review_current, NO_ISSUES_MARKER).expect("write");
        let settings = settings();
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

        let err = process_results(&session).expect_err("policy violation");

        match err.downcast_ref::<PolicyViolation>() {
            Some(PolicyViolation::ProhibitedRuffIgnores(violations)) => {
                assert_eq!(violations.len(), 1);
                assert!(violations["src/app.py"].contains("C901"));
                assert!(!violations["src/app.py"].contains("E501"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unparseable_pyproject_is_a_policy_violation() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("pyproject.toml"), "[tool.ruff\nbroken = ").expect("write");

        let err = enforce_ruff_policy(dir.path()).expect_err("unparseable");

        assert!(matches!(
            err.downcast_ref::<PolicyViolation>(),
            Some(PolicyViolation::UnparseableRuffConfig { .. })
        ));
    }
}
