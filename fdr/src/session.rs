//! Collaborators and mutable state shared by the loop phases.

use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::core::messages::format_duration;
use crate::core::signatures::{is_capacity_error, is_long_context_error};
use crate::io::agent::{Agent, AgentReply, AgentRequest};
use crate::io::artifacts::ArtifactStore;
use crate::io::config::Settings;
use crate::io::git::Git;
use crate::io::github::ReviewHost;
use crate::io::paths::FdrPaths;
use crate::io::process::CommandRunner;
use crate::io::prompt::PromptEngine;

/// Everything a phase needs to talk to the outside world.
///
/// Built once by the binary (or a test) and borrowed by every phase.
#[derive(Clone, Copy)]
pub struct Session<'a> {
    pub settings: &'a Settings,
    pub paths: &'a FdrPaths,
    pub runner: &'a dyn CommandRunner,
    pub agent: &'a dyn Agent,
    /// Present only when PR review is possible.
    pub host: Option<&'a dyn ReviewHost>,
    pub prompts: &'a PromptEngine,
}

impl<'a> Session<'a> {
    pub fn git(&self) -> Git<'a> {
        Git::new(self.runner, &self.paths.root)
    }

    pub fn store(&self) -> ArtifactStore<'a> {
        ArtifactStore::new(self.paths)
    }

    /// Invoke the agent once, retrying a failed call exactly once.
    ///
    /// Before the retry a capacity failure triggers a model-skip directive
    /// and a long-context failure forces an emergency compaction.
    pub fn invoke_agent(&self, state: &mut RunState, request: &AgentRequest) -> Result<AgentReply> {
        let reply = self.call_agent(state, request)?;
        if reply.success() {
            return Ok(reply);
        }

        let output = reply.output();
        if is_capacity_error(&output) {
            info!("Detected model capacity error (503). Skipping current model...");
            self.call_agent(state, &AgentRequest::model_skip())?;
        } else if is_long_context_error(&output) {
            info!("Detected long context rate limit (429). Forcing emergency compaction...");
            match self.store().emergency_compact() {
                Ok(()) => info!("Emergency compaction complete. Retrying..."),
                Err(err) => error!("Emergency compaction failed: {err:#}"),
            }
        }

        info!(
            "{} failed (exit {:?}). Retrying once...",
            self.settings.agent_program, reply.exit_code
        );
        self.call_agent(state, request)
    }

    fn call_agent(&self, state: &mut RunState, request: &AgentRequest) -> Result<AgentReply> {
        if state.agent_calls > 0 && !self.settings.agent_delay.is_zero() {
            thread::sleep(self.settings.agent_delay);
        }
        state.agent_calls += 1;
        self.agent.invoke(request)
    }
}

/// In-memory state of one run. Discarded at exit.
#[derive(Debug, Clone)]
pub struct RunState {
    /// Current outer iteration, starting at 1.
    pub iteration: u32,
    /// Agent invocations so far, retries and directives included.
    pub agent_calls: u32,
    /// `HEAD` when the run started, if git could report it.
    pub start_sha: Option<String>,
    /// Consecutive review-fix attempts that changed nothing. Diagnostic only.
    pub toolless_attempts: u32,
    pub session_log: PathBuf,
    pub started_at: Instant,
}

impl RunState {
    pub fn new(session_log: PathBuf) -> Self {
        Self {
            iteration: 0,
            agent_calls: 0,
            start_sha: None,
            toolless_attempts: 0,
            session_log,
            started_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> String {
        format_duration(self.started_at.elapsed().as_secs())
    }

    /// Count a review-fix attempt that left the tree untouched.
    pub fn note_toolless_attempt(&mut self) {
        self.toolless_attempts += 1;
        if self.toolless_attempts > 1 {
            warn!(
                "{} consecutive review-fix attempts changed no files",
                self.toolless_attempts
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::compaction::EMERGENCY_KEEP_LINES;
    use crate::io::artifacts::{line_count, write_file};
    use crate::test_support::{FakeRunner, ScriptedAgent, ScriptedTurn};

    struct Fixture {
        _dir: tempfile::TempDir,
        settings: Settings,
        paths: FdrPaths,
        runner: FakeRunner,
        prompts: PromptEngine,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = FdrPaths::new(dir.path());
        std::fs::create_dir_all(&paths.fdr_dir).expect("mkdir");
        Fixture {
            _dir: dir,
            settings: Settings {
                check_cmd: "true".to_string(),
                agent_delay: Duration::ZERO,
                ..Settings::default()
            },
            paths,
            runner: FakeRunner::new(),
            prompts: PromptEngine::new().expect("prompts"),
        }
    }

    fn session<'a>(fx: &'a Fixture, agent: &'a dyn Agent) -> Session<'a> {
        Session {
            settings: &fx.settings,
            paths: &fx.paths,
            runner: &fx.runner,
            agent,
            host: None,
            prompts: &fx.prompts,
        }
    }

    #[test]
    fn successful_call_is_not_retried() {
        let fx = fixture();
        let agent = ScriptedAgent::new(&fx.paths.root, vec![ScriptedTurn::ok()]);
        let mut state = RunState::new(fx.paths.fdr_dir.join("session.log"));
        let reply = session(&fx, &agent)
            .invoke_agent(&mut state, &AgentRequest::new("fix"))
            .expect("invoke");
        assert!(reply.success());
        assert_eq!(agent.requests().len(), 1);
        assert_eq!(state.agent_calls, 1);
    }

    #[test]
    fn capacity_error_skips_model_before_retry() {
        let fx = fixture();
        let agent = ScriptedAgent::new(
            &fx.paths.root,
            vec![ScriptedTurn::fail("HTTP 503: No capacity"), ScriptedTurn::ok()],
        );
        let mut state = RunState::new(fx.paths.fdr_dir.join("session.log"));
        session(&fx, &agent)
            .invoke_agent(&mut state, &AgentRequest::new("fix"))
            .expect("invoke");

        let prompts: Vec<String> = agent.requests().into_iter().map(|r| r.prompt).collect();
        assert_eq!(prompts, vec!["fix", "/model-skip", "fix"]);
        assert_eq!(state.agent_calls, 3);
    }

    #[test]
    fn long_context_error_compacts_before_retry() {
        let fx = fixture();
        let history: String = (0..300).map(|i| format!("entry {i}\n")).collect();
        write_file(&fx.paths.build_history, &history).expect("write");
        let agent = ScriptedAgent::new(
            &fx.paths.root,
            vec![
                ScriptedTurn::fail("429 Too Many Requests: long context"),
                ScriptedTurn::fail("still failing"),
            ],
        );
        let mut state = RunState::new(fx.paths.fdr_dir.join("session.log"));
        let reply = session(&fx, &agent)
            .invoke_agent(&mut state, &AgentRequest::new("fix"))
            .expect("invoke");

        assert!(!reply.success());
        assert_eq!(agent.requests().len(), 2);
        assert_eq!(line_count(&fx.paths.build_history), EMERGENCY_KEEP_LINES);
    }
}
