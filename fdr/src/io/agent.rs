//! Agent abstraction for the external coding agent.
//!
//! The [`Agent`] trait decouples the loop phases from the actual backend
//! (currently `pi`). Tests use scripted agents that edit files and return
//! canned replies without spawning processes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, instrument};

use crate::core::types::Interrupted;
use crate::io::artifacts::append_file;
use crate::io::process::{CommandRunner, CommandSpec};

/// Tools for fixing check failures and review issues.
pub const FIX_TOOLS: &str = "read,edit,write,bash,grep,find,ls";
/// Tools for reviewing changes (no editing of sources).
pub const REVIEW_TOOLS: &str = "read,write,grep,find,ls";
/// Tools for the introspection analysis.
pub const INTROSPECTION_TOOLS: &str = "read,write";

/// One agent invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentRequest {
    /// Tool allowlist (`--tools`); `None` leaves the agent default.
    pub tools: Option<String>,
    /// Model override (`--model`).
    pub model: Option<String>,
    /// Files the agent inlines itself (`@path`).
    pub attachments: Vec<PathBuf>,
    pub prompt: String,
}

impl AgentRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn tools(mut self, tools: &str) -> Self {
        self.tools = Some(tools.to_string());
        self
    }

    pub fn model(mut self, model: Option<&str>) -> Self {
        self.model = model.map(str::to_string);
        self
    }

    pub fn attach(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachments.push(path.into());
        self
    }

    /// Directive asking the agent to move past an exhausted model.
    pub fn model_skip() -> Self {
        Self::new("/model-skip")
    }

    /// Command-line arguments in the agent's calling convention.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["-p".to_string()];
        if let Some(tools) = &self.tools {
            args.push("--tools".to_string());
            args.push(tools.clone());
        }
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.extend(
            self.attachments
                .iter()
                .map(|path| format!("@{}", path.display())),
        );
        args.push(self.prompt.clone());
        args
    }

    pub fn is_attached(&self, path: &Path) -> bool {
        self.attachments.iter().any(|p| p == path)
    }
}

/// What the agent returned. Only the exit code and output are observable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentReply {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl AgentReply {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: message.into(),
        }
    }

    pub fn output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Abstraction over agent backends.
pub trait Agent {
    /// Run one invocation. Only [`Interrupted`] is returned as an error;
    /// everything else is a failed reply.
    fn invoke(&self, request: &AgentRequest) -> Result<AgentReply>;
}

/// Agent that spawns `pi` and appends every call to the agent log.
pub struct PiAgent<'a> {
    runner: &'a dyn CommandRunner,
    program: String,
    workdir: PathBuf,
    log_path: PathBuf,
    timeout: Option<Duration>,
}

impl<'a> PiAgent<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        program: &str,
        workdir: &Path,
        log_path: &Path,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            runner,
            program: program.to_string(),
            workdir: workdir.to_path_buf(),
            log_path: log_path.to_path_buf(),
            timeout,
        }
    }

    fn log_call(&self, spec: &CommandSpec, reply: &AgentReply) {
        let mut entry = format!("Command: {}\n", spec.display());
        match reply.exit_code {
            Some(code) => entry.push_str(&format!("Exit code: {code}\n")),
            None => entry.push_str("Exit code: none\n"),
        }
        if !reply.stdout.is_empty() {
            entry.push_str(&format!("STDOUT:\n{}\n", reply.stdout));
        }
        if !reply.stderr.is_empty() {
            entry.push_str(&format!("STDERR:\n{}\n", reply.stderr));
        }
        entry.push('\n');
        if let Err(err) = append_file(&self.log_path, &entry) {
            error!(err = %format!("{err:#}"), "unable to append agent log");
        }
    }
}

impl Agent for PiAgent<'_> {
    #[instrument(skip_all, fields(program = %self.program, tools = ?request.tools))]
    fn invoke(&self, request: &AgentRequest) -> Result<AgentReply> {
        let spec = CommandSpec::new(self.program.clone())
            .args(request.args())
            .current_dir(&self.workdir)
            .timeout(self.timeout);

        let reply = match self.runner.run(&spec) {
            Ok(output) => {
                let mut reply = AgentReply {
                    exit_code: output.exit_code,
                    stdout: output.stdout_text(),
                    stderr: output.stderr_text(),
                };
                if output.timed_out {
                    reply.exit_code = None;
                    reply.stderr.push_str("\nagent timed out\n");
                }
                reply
            }
            Err(err) if err.downcast_ref::<Interrupted>().is_some() => return Err(err),
            Err(err) => AgentReply::failed(format!("{err:#}")),
        };

        self.log_call(&spec, &reply);
        if !reply.success() {
            error!("{} exited with code {:?}", self.program, reply.exit_code);
            info!("{} output logged to: {}", self.program, self.log_path.display());
        }
        Ok(reply)
    }
}
