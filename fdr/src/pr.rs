//! PR review threads: fetch, cache, limit, and in-scope resolution.
//!
//! The in-scope ID file written by [`fetch_threads`] is the only list of
//! thread IDs that [`resolve_threads`] will ever send to the host. IDs are
//! never re-derived from the cached markdown.

use anyhow::Result;
use tracing::{error, info, instrument, warn};

use crate::core::messages::{threads_not_in_scope_warning, threads_out_of_scope_warning};
use crate::core::scope::{parse_ids, partition};
use crate::core::threads::{ReviewThread, format_threads, limit, thread_ids};
use crate::io::artifacts::{append_file, read_or_empty, remove_file, write_file};
use crate::io::github::{PrInfo, ReviewHost};
use crate::session::{RunState, Session};

/// Result of a resolution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Nothing was reported, nothing was in scope, or nothing resolved.
    NothingResolved,
    /// Some threads were resolved; `remaining` are still open.
    Remaining { remaining: usize },
    /// The refreshed PR has no unresolved threads left.
    AllResolved,
}

/// Write unresolved PR threads to `review_current.md`.
///
/// Every failure is contained: a skipped fetch leaves `review_current.md`
/// absent, which sends the review phase down the local path.
#[instrument(skip_all, fields(iteration = state.iteration))]
pub fn fetch_threads(session: &Session<'_>, state: &RunState) -> Result<()> {
    info!("[Step 3.5] Checking for unresolved PR threads...");
    let Some(host) = session.host else {
        warn!("PR review requested but no hosting CLI is available. Skipping PR review.");
        return Ok(());
    };

    let branch = match session.git().current_branch() {
        Ok(Some(branch)) => branch,
        Ok(None) | Err(_) => {
            error!("Not on a git branch. Skipping PR review.");
            return Ok(());
        }
    };
    info!("Fetching PR info for branch: {branch}");

    match host.is_authenticated() {
        Ok(true) => {}
        Ok(false) | Err(_) => {
            error!("GitHub CLI not authenticated. Skipping PR review.");
            return Ok(());
        }
    }

    let pr = match host.pull_request(&branch) {
        Ok(Some(pr)) => pr,
        Ok(None) | Err(_) => {
            info!("No open PR found for {branch} or error fetching PR. Skipping PR review.");
            return Ok(());
        }
    };
    info!("Found PR #{} ({}). Checking for cached threads...", pr.number, pr.url);

    if use_cache(session, &pr)? {
        return Ok(());
    }
    info!("Cache miss or invalid. Fetching fresh threads...");

    let threads = match host.review_threads(&pr) {
        Ok(threads) => threads,
        Err(err) => {
            error!("Failed to fetch PR threads: {err:#}");
            return Ok(());
        }
    };
    let unresolved: Vec<ReviewThread> = threads.into_iter().filter(|t| !t.is_resolved).collect();
    let limited = limit(unresolved, session.settings.max_pr_threads);
    if !limited.skipped.is_empty() {
        warn!("{}", threads_out_of_scope_warning(&thread_ids(&limited.skipped)));
        info!("Only the {} most recent thread(s) are in scope.", limited.kept.len());
    }

    let paths = session.paths;
    if limited.kept.is_empty() {
        info!("No unresolved threads found.");
        write_file(&paths.review_current, "")?;
        persist_in_scope(session, &[])?;
        return Ok(());
    }

    let content = render_threads(session, &pr, &limited.kept)?;
    write_file(&paths.review_current, &content)?;
    persist_in_scope(session, &thread_ids(&limited.kept))?;
    info!(
        "Found {} unresolved threads. Added to review queue.",
        limited.kept.len()
    );

    write_file(&paths.pr_threads_cache, &content)?;
    write_file(&paths.pr_threads_key, &pr.cache_key())?;
    append_file(
        &paths.cumulative_threads,
        &format!(
            "# Iteration {} - Fetched {} threads\n{content}\n",
            state.iteration,
            limited.kept.len()
        ),
    )?;
    Ok(())
}

fn render_threads(session: &Session<'_>, pr: &PrInfo, threads: &[ReviewThread]) -> Result<String> {
    let header = session
        .prompts
        .pr_threads_header(threads.len(), pr.number, &pr.url)?;
    Ok(format!("{header}\n\n{}", format_threads(threads)))
}

/// Reuse the cached payload when it belongs to this PR and its ID file is intact.
fn use_cache(session: &Session<'_>, pr: &PrInfo) -> Result<bool> {
    let paths = session.paths;
    let key_matches = paths.pr_threads_cache.exists()
        && read_or_empty(&paths.pr_threads_key)? == pr.cache_key();
    if !key_matches {
        return Ok(false);
    }
    if !paths.pr_thread_ids.exists() {
        warn!("PR thread cache exists but in-scope ID file is missing. Refetching threads.");
        return Ok(false);
    }
    let ids = parse_ids(&read_or_empty(&paths.pr_thread_ids)?);
    if ids.is_empty() {
        warn!("PR thread cache exists but in-scope ID file is empty. Refetching threads.");
        return Ok(false);
    }

    info!("Using cached PR threads (unchanged)...");
    write_file(&paths.review_current, &read_or_empty(&paths.pr_threads_cache)?)?;
    persist_in_scope(session, &ids)?;
    info!("Found {} unresolved threads from cache.", ids.len());
    Ok(true)
}

/// Rewrite the in-scope ID file and union new IDs into the cumulative one.
fn persist_in_scope(session: &Session<'_>, ids: &[String]) -> Result<()> {
    let paths = session.paths;
    let unique = parse_ids(&ids.join("\n"));
    if unique.is_empty() {
        return remove_file(&paths.pr_thread_ids);
    }
    write_file(&paths.pr_thread_ids, &format!("{}\n", unique.join("\n")))?;

    let known = parse_ids(&read_or_empty(&paths.cumulative_in_scope)?);
    let mut new_ids: Vec<&String> = unique.iter().filter(|id| !known.contains(id)).collect();
    new_ids.sort();
    if !new_ids.is_empty() {
        let lines: String = new_ids.iter().map(|id| format!("{id}\n")).collect();
        append_file(&paths.cumulative_in_scope, &lines)?;
    }
    Ok(())
}

/// Resolve the threads the agent reported in `.resolved_threads`, but only
/// those in the persisted in-scope set.
#[instrument(skip_all, fields(iteration = state.iteration))]
pub fn resolve_threads(session: &Session<'_>, state: &RunState) -> Result<ResolveOutcome> {
    let paths = session.paths;
    let outcome = resolve_reported(session, state);
    remove_file(&paths.resolved_threads)?;
    outcome
}

fn resolve_reported(session: &Session<'_>, state: &RunState) -> Result<ResolveOutcome> {
    let paths = session.paths;
    let reported = parse_ids(&read_or_empty(&paths.resolved_threads)?);
    if reported.is_empty() {
        info!("No threads were reported as resolved. Continuing to next iteration.");
        return Ok(ResolveOutcome::NothingResolved);
    }
    info!("Model reported {} resolved thread(s).", reported.len());

    let in_scope = parse_ids(&read_or_empty(&paths.pr_thread_ids)?);
    let check = partition(&reported, &in_scope);
    if !check.rejected.is_empty() {
        warn!("{}", threads_not_in_scope_warning(&check.rejected));
        info!("Only resolving the {} in-scope thread(s).", check.allowed.len());
    }
    if check.allowed.is_empty() {
        info!("No in-scope threads were reported as resolved. Continuing to next iteration.");
        return Ok(ResolveOutcome::NothingResolved);
    }
    let Some(host) = session.host else {
        warn!("No hosting CLI available; cannot resolve PR threads.");
        return Ok(ResolveOutcome::NothingResolved);
    };

    let mut resolved = 0usize;
    for id in &check.allowed {
        info!("Resolving PR thread {id} via gh GraphQL");
        match host.resolve_thread(id) {
            Ok(()) => {
                resolved += 1;
                append_file(&paths.cumulative_resolved, &format!("{id}\n"))?;
            }
            Err(err) => warn!("Failed to resolve thread {id}: {err:#}"),
        }
    }
    info!(
        "Successfully resolved {resolved} of {} thread(s).",
        check.allowed.len()
    );
    if resolved == 0 {
        return Ok(ResolveOutcome::NothingResolved);
    }

    remove_file(&paths.pr_threads_key)?;
    fetch_threads(session, state)?;
    let remaining = parse_ids(&read_or_empty(&paths.pr_thread_ids)?).len();
    if remaining == 0 {
        info!("All PR threads have been resolved!");
        return Ok(ResolveOutcome::AllResolved);
    }
    info!("{remaining} PR threads remain. Continuing to next iteration.");
    Ok(ResolveOutcome::Remaining { remaining })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::io::config::Settings;
    use crate::io::paths::FdrPaths;
    use crate::io::prompt::PromptEngine;
    use crate::test_support::{FakeHost, ScriptedAgent, TestRepo, thread};

    struct Fixture {
        repo: TestRepo,
        paths: FdrPaths,
        settings: Settings,
        prompts: PromptEngine,
        agent: ScriptedAgent,
    }

    fn fixture(max_pr_threads: usize) -> Fixture {
        let repo = TestRepo::new();
        let paths = FdrPaths::new(repo.root());
        paths.ensure_state_dir().expect("state dir");
        let agent = ScriptedAgent::new(repo.root(), Vec::new());
        Fixture {
            repo,
            paths,
            settings: Settings {
                check_cmd: "true".to_string(),
                pr_review: true,
                max_pr_threads,
                agent_delay: Duration::ZERO,
                ..Settings::default()
            },
            prompts: PromptEngine::new().expect("prompts"),
            agent,
        }
    }

    fn session<'a>(fx: &'a Fixture, host: &'a FakeHost) -> Session<'a> {
        Session {
            settings: &fx.settings,
            paths: &fx.paths,
            runner: fx.repo.runner(),
            agent: &fx.agent,
            host: Some(host),
            prompts: &fx.prompts,
        }
    }

    fn state() -> RunState {
        let mut state = RunState::new("session.log".into());
        state.iteration = 1;
        state
    }

    #[test]
    fn fetch_limits_threads_and_persists_scope() {
        let fx = fixture(2);
        let host = FakeHost::new(vec![
            thread("A", "2024-01-03T00:00:00Z", "newest"),
            thread("B", "2024-01-02T00:00:00Z", "middle"),
            thread("C", "2024-01-01T00:00:00Z", "oldest"),
        ]);
        fetch_threads(&session(&fx, &host), &state()).expect("fetch");

        let ids = read_or_empty(&fx.paths.pr_thread_ids).expect("ids");
        assert_eq!(ids, "A\nB\n");
        let current = read_or_empty(&fx.paths.review_current).expect("current");
        assert!(current.contains("ID: A"));
        assert!(!current.contains("ID: C"));
        assert_eq!(read_or_empty(&fx.paths.pr_threads_key).expect("key"), "acme/widgets/7");
        assert_eq!(
            read_or_empty(&fx.paths.cumulative_in_scope).expect("cumulative"),
            "A\nB\n"
        );
    }

    #[test]
    fn cache_hit_skips_the_api() {
        let fx = fixture(5);
        let host = FakeHost::new(vec![thread("A", "2024-01-01T00:00:00Z", "fix")]);
        let session = session(&fx, &host);
        fetch_threads(&session, &state()).expect("first");
        fetch_threads(&session, &state()).expect("second");
        assert_eq!(host.fetch_count(), 1);

        remove_file(&fx.paths.pr_thread_ids).expect("remove ids");
        fetch_threads(&session, &state()).expect("third");
        assert_eq!(host.fetch_count(), 2);
    }

    #[test]
    fn only_in_scope_ids_reach_the_api() {
        let fx = fixture(5);
        let host = FakeHost::new(vec![
            thread("A", "2024-01-02T00:00:00Z", "first"),
            thread("B", "2024-01-01T00:00:00Z", "second"),
        ]);
        let session = session(&fx, &host);
        fetch_threads(&session, &state()).expect("fetch");
        write_file(&fx.paths.resolved_threads, "A\nC\n").expect("report");

        let outcome = resolve_threads(&session, &state()).expect("resolve");

        assert_eq!(host.resolve_calls(), vec!["A"]);
        assert_eq!(outcome, ResolveOutcome::Remaining { remaining: 1 });
        assert!(!fx.paths.resolved_threads.exists());
        assert_eq!(
            read_or_empty(&fx.paths.cumulative_resolved).expect("resolved"),
            "A\n"
        );
    }

    #[test]
    fn resolving_the_last_thread_reports_all_resolved() {
        let fx = fixture(5);
        let host = FakeHost::new(vec![thread("A", "2024-01-02T00:00:00Z", "only")]);
        let session = session(&fx, &host);
        fetch_threads(&session, &state()).expect("fetch");
        write_file(&fx.paths.resolved_threads, "A\n").expect("report");

        let outcome = resolve_threads(&session, &state()).expect("resolve");

        assert_eq!(outcome, ResolveOutcome::AllResolved);
        assert_eq!(read_or_empty(&fx.paths.review_current).expect("current"), "");
        assert!(!fx.paths.pr_thread_ids.exists());
    }

    #[test]
    fn failed_resolution_is_partial() {
        let fx = fixture(5);
        let host = FakeHost::new(vec![
            thread("A", "2024-01-02T00:00:00Z", "first"),
            thread("B", "2024-01-01T00:00:00Z", "second"),
        ])
        .fail_resolving("B");
        let session = session(&fx, &host);
        fetch_threads(&session, &state()).expect("fetch");
        write_file(&fx.paths.resolved_threads, "A\nB\n").expect("report");

        let outcome = resolve_threads(&session, &state()).expect("resolve");

        assert_eq!(host.resolve_calls(), vec!["A", "B"]);
        assert_eq!(outcome, ResolveOutcome::Remaining { remaining: 1 });
    }

    #[test]
    fn unauthenticated_host_skips_review() {
        let fx = fixture(5);
        let mut host = FakeHost::new(vec![thread("A", "2024-01-01T00:00:00Z", "x")]);
        host.authenticated = false;
        fetch_threads(&session(&fx, &host), &state()).expect("fetch");
        assert!(!fx.paths.review_current.exists());
        assert_eq!(host.fetch_count(), 0);
    }
}
