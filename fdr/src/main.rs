//! `fix-die-repeat`: run checks, let `pi` fix failures, review, repeat.
//!
//! The only place that reads the environment and the only place that exits
//! the process. Everything else receives an immutable [`Settings`].

use std::env;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use tracing::{error, info};

use fdr::core::types::{BudgetExhausted, Interrupted, PolicyViolation};
use fdr::exit_codes;
use fdr::io::agent::PiAgent;
use fdr::io::artifacts::file_stamp;
use fdr::io::config::{Settings, app_config_dir};
use fdr::io::detect::{CheckCmdSources, TerminalPrompter, resolve_check_cmd};
use fdr::io::git::Git;
use fdr::io::github::{GhCli, ReviewHost};
use fdr::io::paths::FdrPaths;
use fdr::io::process::SystemRunner;
use fdr::io::prompt::PromptEngine;
use fdr::session::{RunState, Session};
use fdr::{logging, looping, preflight};

const GLOBAL_INTROSPECTION_FILE: &str = "introspection.yaml";

#[derive(Parser, Debug)]
#[command(
    name = "fix-die-repeat",
    version,
    about = "Automated check, review, and fix loop using pi",
    after_help = "Examples:\n  fix-die-repeat\n  fix-die-repeat -c \"make test\"\n  \
                  fix-die-repeat --test-model anthropic/claude-sonnet-4-5\n  \
                  fix-die-repeat --pr-review"
)]
struct Cli {
    /// Command that runs the project's checks.
    #[arg(short, long, env = "FDR_CHECK_CMD")]
    check_cmd: Option<String>,

    /// Maximum loop iterations.
    #[arg(short = 'n', long, env = "FDR_MAX_ITERS", default_value_t = 10,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_iters: u32,

    /// Maximum fix attempts per iteration (default: --max-iters).
    #[arg(long, env = "FDR_MAX_FIX_ATTEMPTS", value_parser = clap::value_parser!(u32).range(1..))]
    max_fix_attempts: Option<u32>,

    /// Maximum attempts at fixing one round of review issues.
    #[arg(long, env = "FDR_MAX_REVIEW_FIX_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_review_fix_attempts: u32,

    /// Override model selection (e.g. anthropic/claude-sonnet-4-5).
    #[arg(short, long, env = "FDR_MODEL")]
    model: Option<String>,

    /// Maximum PR threads to process per iteration.
    #[arg(long, env = "FDR_MAX_PR_THREADS", default_value_t = 5,
          value_parser = clap::value_parser!(u64).range(1..=100))]
    max_pr_threads: u64,

    /// Archive existing artifacts to a timestamped folder.
    #[arg(long, env = "FDR_ARCHIVE_ARTIFACTS", action = ArgAction::SetTrue,
          value_parser = BoolishValueParser::new())]
    archive_artifacts: bool,

    /// Skip automatic compaction of large artifacts.
    #[arg(long)]
    no_compact: bool,

    #[arg(long, env = "FDR_COMPACT_ARTIFACTS", default_value_t = true, hide = true,
          action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    compact_artifacts: bool,

    /// Enable PR review mode.
    #[arg(long, env = "FDR_PR_REVIEW", action = ArgAction::SetTrue,
          value_parser = BoolishValueParser::new())]
    pr_review: bool,

    /// Analyse how PR threads were handled after the run (PR review mode).
    #[arg(long, env = "FDR_INTROSPECT", action = ArgAction::SetTrue,
          value_parser = BoolishValueParser::new())]
    introspect: bool,

    /// Test model compatibility and exit.
    #[arg(long, env = "FDR_TEST_MODEL")]
    test_model: Option<String>,

    /// Comma-separated languages for prompt guidance (replaces detection).
    #[arg(long, env = "FDR_LANGUAGES")]
    languages: Option<String>,

    /// Kill check, agent and gh commands after this many seconds.
    #[arg(long, env = "FDR_COMMAND_TIMEOUT")]
    command_timeout: Option<u64>,

    /// Send an ntfy notification when the run ends.
    #[arg(long, env = "FDR_NTFY_ENABLED", default_value_t = true,
          action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    ntfy_enabled: bool,

    /// ntfy server URL.
    #[arg(long, env = "FDR_NTFY_URL", default_value = "http://localhost:2586")]
    ntfy_url: String,

    /// Timestamped session logs and verbose logging.
    #[arg(short, long, env = "FDR_DEBUG", action = ArgAction::SetTrue,
          value_parser = BoolishValueParser::new())]
    debug: bool,
}

impl Cli {
    fn settings(&self, check_cmd: String, global_introspection_log: Option<PathBuf>) -> Settings {
        Settings {
            check_cmd,
            max_iters: self.max_iters,
            max_fix_attempts: self.max_fix_attempts.unwrap_or(self.max_iters),
            max_review_fix_attempts: self.max_review_fix_attempts,
            max_pr_threads: self.max_pr_threads as usize,
            model: self.model.clone(),
            test_model: self.test_model.clone(),
            languages: self.languages.clone(),
            archive_artifacts: self.archive_artifacts,
            compact_artifacts: self.compact_artifacts && !self.no_compact,
            pr_review: self.pr_review,
            introspect: self.introspect,
            debug: self.debug,
            ntfy_enabled: self.ntfy_enabled,
            ntfy_url: self.ntfy_url.clone(),
            command_timeout: self.command_timeout.map(Duration::from_secs),
            global_introspection_log,
            ..Settings::default()
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let code = match run(&cli) {
        Ok(code) => code,
        Err(err) if err.chain().any(|cause| cause.is::<Interrupted>()) => {
            eprintln!("\nInterrupted by user");
            exit_codes::INTERRUPTED
        }
        Err(err) => {
            eprintln!("Error: {err:#}");
            exit_codes::FAILURE
        }
    };
    process::exit(code);
}

fn run(cli: &Cli) -> Result<i32> {
    let runner = SystemRunner::default();
    let cwd = env::current_dir().context("resolve current directory")?;
    let toplevel = Git::new(&runner, &cwd).toplevel();
    let root = toplevel.unwrap_or(cwd);
    let paths = FdrPaths::new(root);
    let config_dir = app_config_dir(env::var("XDG_CONFIG_HOME").ok().as_deref());

    let check_cmd = if cli.test_model.is_some() {
        cli.check_cmd.clone().unwrap_or_default()
    } else {
        resolve_check_cmd(
            &CheckCmdSources {
                explicit: cli.check_cmd.clone(),
                project_config: paths.project_config.clone(),
                system_config: config_dir.as_ref().map(|dir| dir.join("config")),
                project_root: paths.root.clone(),
            },
            &TerminalPrompter,
        )?
    };
    let settings = cli.settings(
        check_cmd,
        config_dir.map(|dir| dir.join(GLOBAL_INTROSPECTION_FILE)),
    );
    if settings.test_model.is_none() {
        settings.validate()?;
    }

    let archived = looping::prepare_state_dir(&paths, &settings)?;
    let session_log = paths.session_log(settings.debug, &file_stamp());
    logging::init(settings.debug, &paths.fdr_log, &session_log)?;
    if let Some(archive) = archived {
        info!("Archived existing artifacts to {}", archive.display());
    }

    let agent = PiAgent::new(
        &runner,
        &settings.agent_program,
        &paths.root,
        &paths.agent_log,
        settings.command_timeout,
    );
    let gh = GhCli::new(&runner, &paths.root, settings.command_timeout);
    let host: Option<&dyn ReviewHost> = if settings.pr_review { Some(&gh) } else { None };
    let prompts = PromptEngine::new()?;
    let session = Session {
        settings: &settings,
        paths: &paths,
        runner: &runner,
        agent: &agent,
        host,
        prompts: &prompts,
    };
    let mut state = RunState::new(session_log);

    if let Some(model) = settings.test_model.as_deref() {
        let passed = preflight::test_model(&session, &mut state, model)?;
        return Ok(if passed {
            exit_codes::OK
        } else {
            exit_codes::FAILURE
        });
    }

    match looping::run(&session, &mut state) {
        Ok(()) => Ok(exit_codes::OK),
        Err(err)
            if err.downcast_ref::<BudgetExhausted>().is_some()
                || err.downcast_ref::<PolicyViolation>().is_some() =>
        {
            error!("{err}");
            Ok(exit_codes::FAILURE)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_attempts_default_to_max_iters() {
        let cli = Cli::parse_from(["fix-die-repeat", "-c", "make test", "-n", "4"]);
        let settings = cli.settings("make test".to_string(), None);
        assert_eq!(settings.max_iters, 4);
        assert_eq!(settings.max_fix_attempts, 4);
        assert!(settings.compact_artifacts);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn no_compact_disables_compaction() {
        let cli = Cli::parse_from(["fix-die-repeat", "--no-compact", "--max-fix-attempts", "2"]);
        let settings = cli.settings("pytest".to_string(), None);
        assert!(!settings.compact_artifacts);
        assert_eq!(settings.max_fix_attempts, 2);
    }

    #[test]
    fn zero_iterations_are_rejected() {
        assert!(Cli::try_parse_from(["fix-die-repeat", "-n", "0"]).is_err());
    }

    #[test]
    fn timeout_is_in_seconds() {
        let cli = Cli::parse_from(["fix-die-repeat", "--command-timeout", "90", "--pr-review"]);
        let settings = cli.settings("pytest".to_string(), None);
        assert_eq!(settings.command_timeout, Some(Duration::from_secs(90)));
        assert!(settings.pr_review);
    }
}
