//! The outer iteration loop: checks, review, review fixes, repeat.
//!
//! Terminal states:
//! - success: checks pass and the review reports nothing (or every in-scope
//!   PR thread is resolved and the checks pass again);
//! - [`BudgetExhausted`]: the iteration or fix-attempt budget ran out;
//! - [`PolicyViolation`](crate::core::types::PolicyViolation): the review
//!   phase found a prohibited ruff ignore. The run stops at once.
//!
//! Introspection runs after success and budget exhaustion, before the result
//! is returned.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::core::messages::rollback_instructions;
use crate::core::types::{Budget, BudgetExhausted};
use crate::fix;
use crate::introspection::run_introspection;
use crate::io::artifacts::{file_stamp, remove_file, write_file};
use crate::io::config::Settings;
use crate::io::notify::{NtfyMessage, play_completion_sound, send_ntfy};
use crate::io::paths::FdrPaths;
use crate::review::{self, ReviewOutcome};
use crate::review_fix::{self, ReviewFixOutcome};
use crate::session::{RunState, Session};

/// Create the state directory and archive the previous run when asked.
///
/// Runs before logging is installed, so the log files of this run never
/// end up in the archive.
pub fn prepare_state_dir(paths: &FdrPaths, settings: &Settings) -> Result<Option<PathBuf>> {
    paths.ensure_state_dir()?;
    if !settings.archive_artifacts {
        return Ok(None);
    }
    paths.archive_artifacts(&file_stamp()).map(Some)
}

/// Drive the run to a terminal state.
pub fn run(session: &Session<'_>, state: &mut RunState) -> Result<()> {
    setup_run(session, state)?;
    let max = session.settings.max_iters;

    loop {
        state.iteration += 1;
        info!("===== Iteration {} of {max} =====", state.iteration);
        compact(session);

        if state.iteration > max {
            error!("Maximum iterations ({max}) exceeded. Could not resolve all issues.");
            return Err(fail(
                session,
                state,
                BudgetExhausted {
                    budget: Budget::Iterations,
                    limit: max,
                    start_sha: state.start_sha.clone(),
                }
                .into(),
            ));
        }

        fix_or_fail(session, state)?;

        if review::run_review_phase(session, state)? == ReviewOutcome::NoIssues {
            return complete_success(session, state);
        }
        if review_fix::fix_review_issues(session, state)? == ReviewFixOutcome::AllThreadsResolved {
            info!("All PR threads resolved. Re-running checks before finishing...");
            fix_or_fail(session, state)?;
            return complete_success(session, state);
        }
    }
}

/// Reset per-run files and record the starting commit.
fn setup_run(session: &Session<'_>, state: &mut RunState) -> Result<()> {
    let paths = session.paths;
    paths.ensure_state_dir()?;
    session.store().reset_run_files()?;
    for path in [
        &paths.cumulative_in_scope,
        &paths.cumulative_resolved,
        &paths.cumulative_threads,
    ] {
        remove_file(path)?;
    }
    info!(
        "Logging full session output to: {}",
        state.session_log.display()
    );

    match session.git().head_sha() {
        Ok(sha) => {
            write_file(&paths.start_sha, &sha)?;
            info!("Git checkpoint: {sha}");
            state.start_sha = Some(sha);
        }
        Err(err) => warn!("No git checkpoint recorded: {err:#}"),
    }

    compact(session);
    Ok(())
}

fn compact(session: &Session<'_>) {
    if !session.settings.compact_artifacts {
        return;
    }
    if let Err(err) = session
        .store()
        .compact(session.settings.compaction_thresholds())
    {
        warn!("Artifact compaction failed: {err:#}");
    }
}

fn fix_or_fail(session: &Session<'_>, state: &mut RunState) -> Result<()> {
    match fix::fix_until_green(session, state) {
        Err(err) if err.downcast_ref::<BudgetExhausted>().is_some() => {
            Err(fail(session, state, err))
        }
        other => other,
    }
}

/// Log rollback hints, introspect and notify, then hand the error back.
fn fail(session: &Session<'_>, state: &mut RunState, err: anyhow::Error) -> anyhow::Error {
    if let Some(sha) = state.start_sha.as_deref() {
        for line in rollback_instructions(sha) {
            error!("{line}");
        }
    }
    run_introspection(session, state);
    notify(session, state, false);
    err
}

fn complete_success(session: &Session<'_>, state: &mut RunState) -> Result<()> {
    run_introspection(session, state);

    let paths = session.paths;
    session.store().record_resolution_clean(state.iteration)?;
    remove_file(&paths.review_current)?;
    remove_file(&paths.start_sha)?;

    info!(
        "[Step 7] Done! All checks passed and no review issues found. {} retained. Session log: {} (took {})",
        paths.relative(&paths.review),
        state.session_log.display(),
        state.elapsed()
    );
    play_completion_sound(session.runner);
    notify(session, state, true);
    Ok(())
}

fn notify(session: &Session<'_>, state: &RunState, success: bool) {
    if !session.settings.ntfy_enabled {
        return;
    }
    let repo_name = session
        .paths
        .root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    send_ntfy(
        &session.settings.ntfy_url,
        &NtfyMessage::new(success, &state.elapsed(), &repo_name),
    );
}
