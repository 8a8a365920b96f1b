//! Check runs and the fix-attempt loop.
//!
//! One fix attempt is one agent invocation followed by a check re-run. The
//! working tree, as seen by git, is the only evidence that an attempt did
//! anything.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::core::context::{choose_mode, large_files, pull_file_list};
use crate::core::lang;
use crate::core::messages::{format_duration, large_file_warning};
use crate::core::types::{Budget, BudgetExhausted, CheckOutput, ContextMode};
use crate::io::agent::{AgentRequest, FIX_TOOLS};
use crate::io::artifacts::has_content;
use crate::io::changes::{TreeSnapshot, changed_files, measure};
use crate::io::process::CommandSpec;
use crate::io::prompt::FixChecksPrompt;
use crate::session::{RunState, Session};

/// What one fix attempt did to the working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Applied,
    NoOp,
}

/// Changed-file context handed to the agent for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixContext {
    pub files: Vec<String>,
    pub mode: ContextMode,
    /// Pull-mode file list; empty in push mode.
    pub file_list: String,
    pub large_file_warning: String,
}

/// Run the check command and persist its output and digest.
pub fn run_checks(session: &Session<'_>) -> Result<CheckOutput> {
    let settings = session.settings;
    let paths = session.paths;
    info!(
        "[Step 1] Running {} (output: {})...",
        settings.check_cmd,
        paths.relative(&paths.checks_log)
    );

    let started = Instant::now();
    let spec = CommandSpec::shell(&settings.check_cmd)
        .current_dir(&paths.root)
        .timeout(settings.command_timeout);
    let output = session
        .runner
        .run(&spec)
        .with_context(|| format!("run check command `{}`", settings.check_cmd))?;

    let mut text = output.combined_text();
    if output.timed_out {
        let secs = settings.command_timeout.map(|t| t.as_secs()).unwrap_or(0);
        text.push_str(&format!("\n[fix-die-repeat] check command timed out after {secs}s\n"));
    }
    let check = CheckOutput {
        exit_code: if output.timed_out { None } else { output.exit_code },
        output: text,
    };
    session.store().write_check_output(&check)?;

    info!(
        "[Step 1] run_checks duration: {} (exit {:?}, {} bytes)",
        format_duration(started.elapsed().as_secs()),
        check.exit_code,
        check.byte_size()
    );
    Ok(check)
}

/// Run checks, then fix and re-run until they pass.
///
/// Fails with [`BudgetExhausted`] once `max_fix_attempts` attempts have not
/// made the checks pass.
pub fn fix_until_green(session: &Session<'_>, state: &mut RunState) -> Result<()> {
    let max = session.settings.max_fix_attempts;
    let mut check = run_checks(session)?;
    let mut attempt = 0u32;

    while !check.passed() {
        attempt += 1;
        if attempt > max {
            error!("Maximum fix attempts ({max}) exhausted. Could not resolve check failures.");
            return Err(BudgetExhausted {
                budget: Budget::FixAttempts,
                limit: max,
                start_sha: state.start_sha.clone(),
            }
            .into());
        }

        let context = prepare_context(session);
        run_fix_attempt(session, state, attempt, &context)?;

        info!(
            "[Step 2A] Re-running {} after fix attempt {attempt}...",
            session.settings.check_cmd
        );
        check = run_checks(session)?;
    }

    info!("[Step 2B] Checks passed. Proceeding to review.");
    Ok(())
}

/// Measure the changed files and pick push or pull mode.
pub fn prepare_context(session: &Session<'_>) -> FixContext {
    let settings = session.settings;
    let files = changed_files(&session.git());
    if files.is_empty() {
        info!("No changed files found.");
    } else {
        info!("Found {} changed file(s)", files.len());
    }

    let stats = measure(&session.paths.root, &files);
    let total: u64 = stats.iter().map(|s| s.bytes).sum();
    let line_counts: Vec<(String, usize)> =
        stats.iter().map(|s| (s.path.clone(), s.lines)).collect();
    let warning = large_file_warning(
        &large_files(&line_counts, settings.large_file_lines),
        settings.large_file_lines,
    );

    let mode = choose_mode(total, settings.auto_attach_threshold);
    let file_list = match mode {
        ContextMode::Pull => {
            info!(
                "Context size ({total} bytes) exceeds threshold ({}). Switching to PULL mode.",
                settings.auto_attach_threshold
            );
            pull_file_list(&files, total)
        }
        ContextMode::Push => {
            info!("Context size ({total} bytes) is within limits. Pushing file contents to prompt.");
            String::new()
        }
    };

    FixContext {
        files,
        mode,
        file_list,
        large_file_warning: warning,
    }
}

/// One agent invocation against the failing checks, recorded in build history.
pub fn run_fix_attempt(
    session: &Session<'_>,
    state: &mut RunState,
    attempt: u32,
    context: &FixContext,
) -> Result<AttemptOutcome> {
    let settings = session.settings;
    let paths = session.paths;
    let store = session.store();
    let git = session.git();

    let oscillation = store.check_oscillation(&git, state.iteration)?;
    info!(
        "[Step 2A] Checks failed (fix attempt {attempt}/{}). Running {} to fix errors...",
        settings.max_fix_attempts, settings.agent_program
    );
    store.filter_checks_log()?;

    let include_review = has_content(&paths.review);
    let include_build = has_content(&paths.build_history);
    let mut request = AgentRequest::new(String::new())
        .tools(FIX_TOOLS)
        .model(settings.model.as_deref())
        .attach(paths.relative(&paths.checks_filtered_log));
    if include_review {
        request = request.attach(paths.relative(&paths.review));
    }
    if include_build {
        request = request.attach(paths.relative(&paths.build_history));
    }
    if context.mode == ContextMode::Push {
        for file in &context.files {
            request = request.attach(PathBuf::from(file));
        }
    }

    let languages: Vec<String> = lang::resolve(&context.files, settings.languages.as_deref())
        .into_iter()
        .collect();
    request.prompt = session.prompts.fix_checks(
        &FixChecksPrompt {
            check_cmd: &settings.check_cmd,
            oscillation_warning: oscillation.as_deref(),
            include_review_history: include_review,
            include_build_history: include_build,
            context_mode: "",
            large_context_list: &context.file_list,
            large_file_warning: &context.large_file_warning,
            languages,
        }
        .mode(context.mode),
    )?;

    info!("Running {} to fix errors (attempt {attempt})...", settings.agent_program);
    let before = TreeSnapshot::capture(&git);
    let reply = session.invoke_agent(state, &request)?;
    if !reply.success() {
        info!(
            "{} could not produce a fix on attempt {attempt}.",
            settings.agent_program
        );
    }

    // A no-op is "the agent changed nothing", judged against the snapshot
    // taken before the call. A tree that was already dirty and is left
    // untouched is recorded as a failed attempt, not as a diff-stat.
    let after = TreeSnapshot::capture(&git);
    if !after.changed_since(&before) {
        error!(
            "{} reported success but NO files were modified. This suggests 'edit' commands \
             failed (e.g., text not found).",
            settings.agent_program
        );
        store.record_fix_noop(state.iteration, attempt)?;
        return Ok(AttemptOutcome::NoOp);
    }

    let stat = git.diff_stat().unwrap_or_default();
    store.record_fix_applied(state.iteration, attempt, &stat)?;
    Ok(AttemptOutcome::Applied)
}
