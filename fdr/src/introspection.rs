//! Post-run analysis of how the agent handled PR review threads.
//!
//! Never affects the outcome of a run: every failure is logged and the
//! temporary data and result files are removed regardless.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::core::scope::parse_ids;
use crate::io::agent::{AgentRequest, INTROSPECTION_TOOLS};
use crate::io::artifacts::{has_content, read_or_empty, remove_file, write_file};
use crate::io::github::PrInfo;
use crate::io::global_log;
use crate::session::{RunState, Session};

const DATA_HEADER: &str = "# Introspection input data for PR review\n";

/// What happened to one in-scope thread over the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadOutcome {
    pub id: String,
    /// `fixed` when the thread was resolved, `wont-fix` otherwise.
    pub outcome: &'static str,
}

/// Input document handed to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntrospectionData {
    pub pr_number: u64,
    pub pr_url: String,
    pub in_scope_thread_ids: Vec<ThreadOutcome>,
    pub pr_threads: String,
    pub changes_diff: String,
}

impl IntrospectionData {
    pub fn to_yaml(&self) -> Result<String> {
        let body = serde_yaml_bw::to_string(self).context("serialize introspection data")?;
        Ok(format!("{DATA_HEADER}{body}"))
    }
}

/// Run introspection when enabled. Errors are reported, never returned.
pub fn run_introspection(session: &Session<'_>, state: &mut RunState) {
    if !session.settings.introspect {
        return;
    }
    info!("[Introspection] Running PR review introspection...");
    if let Err(err) = introspect(session, state) {
        warn!("[Introspection] Unexpected error during introspection (non-blocking): {err:#}");
    }
    let paths = session.paths;
    for path in [&paths.introspection_data, &paths.introspection_result] {
        if let Err(err) = remove_file(path) {
            warn!("[Introspection] Could not remove {}: {err:#}", path.display());
        }
    }
}

fn introspect(session: &Session<'_>, state: &mut RunState) -> Result<()> {
    let paths = session.paths;
    let Some(pr) = pull_request(session) else {
        return Ok(());
    };
    let Some(global_path) = session.settings.global_introspection_log.as_deref() else {
        warn!("[Introspection] No location for the global introspection log, skipping");
        return Ok(());
    };

    info!("Collecting introspection data...");
    let data = collect_data(session, state, &pr)?;
    write_file(&paths.introspection_data, &data.to_yaml()?)?;
    info!(
        "Collected introspection data to {}",
        paths.relative(&paths.introspection_data)
    );

    let project_name = paths
        .root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let run_date = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let prompt = session.prompts.introspect_pr_review(
        &run_date,
        &project_name,
        pr.number,
        &pr.url,
        &paths.relative(&paths.introspection_result),
    )?;
    let request = AgentRequest::new(prompt)
        .tools(INTROSPECTION_TOOLS)
        .model(session.settings.model.as_deref())
        .attach(paths.relative(&paths.introspection_data));

    info!(
        "[Introspection] Calling {} to analyze PR threads...",
        session.settings.agent_program
    );
    let reply = session.invoke_agent(state, &request)?;
    if !reply.success() {
        warn!(
            "[Introspection] {} call failed (exit {:?}), skipping introspection",
            session.settings.agent_program, reply.exit_code
        );
        return Ok(());
    }

    if !paths.introspection_result.exists() {
        warn!(
            "[Introspection] {} did not create result file, skipping",
            session.settings.agent_program
        );
        return Ok(());
    }
    if !has_content(&paths.introspection_result) {
        warn!("[Introspection] Result file is empty, skipping append");
        return Ok(());
    }
    let result = read_or_empty(&paths.introspection_result)?;
    if let Err(err) = serde_yaml_bw::from_str::<serde_yaml_bw::Value>(&result) {
        warn!("[Introspection] Result is not valid YAML: {err}");
        tracing::debug!("[Introspection] Invalid YAML content:\n{result}");
        return Ok(());
    }

    global_log::append_document(global_path, &result)?;
    info!(
        "[Introspection] Appended analysis to {}",
        global_path.display()
    );
    Ok(())
}

/// The PR the run worked on, or `None` with a log line saying why not.
fn pull_request(session: &Session<'_>) -> Option<PrInfo> {
    if !session.paths.cumulative_in_scope.exists() {
        info!("[Introspection] No PR threads were processed, skipping introspection");
        return None;
    }
    let Some(host) = session.host else {
        warn!("[Introspection] No hosting CLI available, skipping introspection");
        return None;
    };
    let branch = match session.git().current_branch() {
        Ok(Some(branch)) => branch,
        Ok(None) | Err(_) => {
            warn!("[Introspection] Not on a git branch, skipping introspection");
            return None;
        }
    };
    match host.pull_request(&branch) {
        Ok(Some(pr)) => Some(pr),
        Ok(None) | Err(_) => {
            warn!("[Introspection] No PR info available, skipping introspection");
            None
        }
    }
}

/// Gather the cumulative thread outcomes and the run's diff.
pub fn collect_data(
    session: &Session<'_>,
    state: &RunState,
    pr: &PrInfo,
) -> Result<IntrospectionData> {
    let paths = session.paths;
    let in_scope = parse_ids(&read_or_empty(&paths.cumulative_in_scope)?);
    let resolved: BTreeSet<String> = parse_ids(&read_or_empty(&paths.cumulative_resolved)?)
        .into_iter()
        .collect();
    let in_scope_thread_ids = in_scope
        .into_iter()
        .map(|id| {
            let outcome = if resolved.contains(&id) {
                "fixed"
            } else {
                "wont-fix"
            };
            ThreadOutcome { id, outcome }
        })
        .collect();

    let changes_diff = if paths.diff.exists() {
        read_or_empty(&paths.diff)?
    } else {
        match state.start_sha.as_deref() {
            Some(sha) => session.git().diff(Some(sha)).unwrap_or_default(),
            None => String::new(),
        }
    };

    Ok(IntrospectionData {
        pr_number: pr.number,
        pr_url: pr.url.clone(),
        in_scope_thread_ids,
        pr_threads: read_or_empty(&paths.cumulative_threads)?,
        changes_diff,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::io::config::Settings;
    use crate::io::paths::FdrPaths;
    use crate::io::prompt::PromptEngine;
    use crate::test_support::{FakeHost, ScriptedAgent, ScriptedTurn, TestRepo};

    const RESULT: &str = ".fix-die-repeat/introspection_result.yaml";

    struct Fixture {
        repo: TestRepo,
        global: tempfile::TempDir,
        paths: FdrPaths,
        settings: Settings,
        prompts: PromptEngine,
        host: FakeHost,
    }

    fn fixture() -> Fixture {
        let repo = TestRepo::new();
        let global = tempfile::tempdir().expect("tempdir");
        let paths = FdrPaths::new(repo.root());
        paths.ensure_state_dir().expect("state dir");
        write_file(&paths.cumulative_in_scope, "PRRT_a\nPRRT_b\n").expect("write");
        write_file(&paths.cumulative_resolved, "PRRT_a\n").expect("write");
        write_file(&paths.cumulative_threads, "# Iteration 1 - Fetched 2 threads\n").expect("write");
        write_file(&paths.diff, "diff --git a/x b/x\n").expect("write");
        let settings = Settings {
            check_cmd: "true".to_string(),
            pr_review: true,
            introspect: true,
            agent_delay: Duration::ZERO,
            global_introspection_log: Some(global.path().join("introspection.yaml")),
            ..Settings::default()
        };
        Fixture {
            repo,
            global,
            paths,
            settings,
            prompts: PromptEngine::new().expect("prompts"),
            host: FakeHost::new(Vec::new()),
        }
    }

    fn session<'a>(fx: &'a Fixture, agent: &'a ScriptedAgent) -> Session<'a> {
        Session {
            settings: &fx.settings,
            paths: &fx.paths,
            runner: fx.repo.runner(),
            agent,
            host: Some(&fx.host),
            prompts: &fx.prompts,
        }
    }

    #[test]
    fn outcomes_follow_the_cumulative_resolved_set() {
        let fx = fixture();
        let agent = ScriptedAgent::new(fx.repo.root(), Vec::new());
        let pr = fx.host.pr.clone().expect("pr");
        let state = RunState::new("session.log".into());

        let data = collect_data(&session(&fx, &agent), &state, &pr).expect("collect");

        assert_eq!(data.pr_number, 7);
        assert_eq!(
            data.in_scope_thread_ids,
            vec![
                ThreadOutcome { id: "PRRT_a".to_string(), outcome: "fixed" },
                ThreadOutcome { id: "PRRT_b".to_string(), outcome: "wont-fix" },
            ]
        );
        assert_eq!(data.changes_diff, "diff --git a/x b/x\n");
        assert!(data.to_yaml().expect("yaml").starts_with(DATA_HEADER));
    }

    #[test]
    fn valid_result_is_appended_and_temporaries_removed() {
        let fx = fixture();
        let agent = ScriptedAgent::new(
            fx.repo.root(),
            vec![ScriptedTurn::ok().write(RESULT, "summary: threads handled\n")],
        );
        let mut state = RunState::new("session.log".into());

        run_introspection(&session(&fx, &agent), &mut state);

        let global = read_or_empty(&fx.global.path().join("introspection.yaml")).expect("read");
        assert_eq!(global, "summary: threads handled\n");
        assert!(!fx.paths.introspection_data.exists());
        assert!(!fx.paths.introspection_result.exists());
        let request = &agent.requests()[0];
        assert_eq!(request.tools.as_deref(), Some(INTROSPECTION_TOOLS));
        assert!(request.is_attached(std::path::Path::new(
            ".fix-die-repeat/introspection_data.yaml"
        )));
    }

    #[test]
    fn invalid_yaml_is_not_appended() {
        let fx = fixture();
        let agent = ScriptedAgent::new(
            fx.repo.root(),
            vec![ScriptedTurn::ok().write(RESULT, "summary: [unclosed\n")],
        );
        let mut state = RunState::new("session.log".into());

        run_introspection(&session(&fx, &agent), &mut state);

        assert!(!fx.global.path().join("introspection.yaml").exists());
        assert!(!fx.paths.introspection_result.exists());
    }

    #[test]
    fn runs_without_pr_threads_are_skipped() {
        let fx = fixture();
        remove_file(&fx.paths.cumulative_in_scope).expect("remove");
        let agent = ScriptedAgent::new(fx.repo.root(), Vec::new());
        let mut state = RunState::new("session.log".into());

        run_introspection(&session(&fx, &agent), &mut state);

        assert!(agent.requests().is_empty());
    }
}
