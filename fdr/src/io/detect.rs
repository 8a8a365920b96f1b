//! Check-command resolution.
//!
//! Priority: explicit flag/env, project config, system config (only when its
//! program exists), auto-detection from project manifests, interactive
//! prompt. Without a terminal the chain ends in an error.

use std::fs;
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::{info, warn};

use crate::io::config::{persist_check_cmd, read_check_cmd};

/// Empty answers tolerated before the prompt gives up.
pub const PROMPT_RETRIES: usize = 3;

/// Interactive questions asked while resolving the check command.
pub trait Prompter {
    fn is_interactive(&self) -> bool;
    /// Yes/no question; an empty answer means yes.
    fn confirm(&self, question: &str) -> Result<bool>;
    /// Free-text question; returns the trimmed answer.
    fn ask(&self, question: &str) -> Result<String>;
}

/// Prompter backed by stdin/stderr.
pub struct TerminalPrompter;

impl TerminalPrompter {
    fn read_answer(question: &str) -> Result<String> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{question} ").context("write prompt")?;
        stderr.flush().context("flush prompt")?;
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("read answer from stdin")?;
        Ok(line.trim().to_string())
    }
}

impl Prompter for TerminalPrompter {
    fn is_interactive(&self) -> bool {
        std::io::stdin().is_terminal()
    }

    fn confirm(&self, question: &str) -> Result<bool> {
        let answer = Self::read_answer(&format!("{question} [Y/n]"))?;
        Ok(matches!(answer.to_ascii_lowercase().as_str(), "" | "y" | "yes"))
    }

    fn ask(&self, question: &str) -> Result<String> {
        Self::read_answer(question)
    }
}

/// A command found in project files, with the file that suggested it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detected {
    pub command: String,
    pub reason: String,
}

impl Detected {
    fn new(command: &str, reason: &str) -> Self {
        Self {
            command: command.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Manifest files mapped straight to a command, checked in order.
const SIMPLE_MANIFESTS: &[(&str, &str)] = &[
    ("Cargo.toml", "cargo test"),
    ("go.mod", "go test ./..."),
    ("pom.xml", "mvn test"),
    ("mix.exs", "mix test"),
    ("Gemfile", "bundle exec rake test"),
    ("build.gradle", "./gradlew test"),
    ("build.gradle.kts", "./gradlew test"),
];

/// Guess a check command from files in `root`. First match wins.
pub fn auto_detect(root: &Path) -> Option<Detected> {
    if root.join("scripts").join("ci.sh").is_file() {
        return Some(Detected::new("./scripts/ci.sh", "from scripts/ci.sh"));
    }
    if let Some(found) = makefile_target(root) {
        return Some(found);
    }
    if let Some(found) = package_json_test(root) {
        return Some(found);
    }
    if let Some(found) = pyproject(root) {
        return Some(found);
    }
    SIMPLE_MANIFESTS
        .iter()
        .find(|(file, _)| root.join(file).is_file())
        .map(|(file, command)| Detected::new(command, &format!("from {file}")))
}

fn makefile_target(root: &Path) -> Option<Detected> {
    static TEST_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^test:\s*$").expect("test target regex"));
    static CHECK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^check:\s*$").expect("check target regex"));

    let contents = fs::read_to_string(root.join("Makefile")).ok()?;
    if TEST_RE.is_match(&contents) {
        return Some(Detected::new("make test", "from Makefile test target"));
    }
    if CHECK_RE.is_match(&contents) {
        return Some(Detected::new("make check", "from Makefile check target"));
    }
    None
}

fn package_json_test(root: &Path) -> Option<Detected> {
    let contents = fs::read_to_string(root.join("package.json")).ok()?;
    let value: serde_json::Value = serde_json::from_str(&contents).ok()?;
    let script = value.get("scripts")?.get("test")?.as_str()?;
    // npm init writes a placeholder that always fails.
    if script.is_empty() || script.contains("no test specified") || script.contains("exit 1") {
        return None;
    }
    Some(Detected::new("npm test", "from package.json scripts.test"))
}

fn pyproject(root: &Path) -> Option<Detected> {
    let contents = fs::read_to_string(root.join("pyproject.toml")).ok()?;
    if contents.contains("[tool.pytest") {
        Some(Detected::new(
            "uv run pytest",
            "from pyproject.toml with pytest configuration",
        ))
    } else {
        Some(Detected::new("uv run python -m pytest", "from pyproject.toml"))
    }
}

/// Whether the program a shell command starts with can be run.
///
/// Relative (`./x`) and absolute paths are checked against `root`; bare
/// names are looked up on `PATH`.
pub fn command_exists(command: &str, root: &Path) -> bool {
    let Some(first) = command.split_whitespace().next() else {
        return false;
    };
    let program = first.trim_matches(|c| c == '"' || c == '\'');
    if program.contains('/') {
        return is_executable(&root.join(program));
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(program))))
        .unwrap_or(false)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Inputs to [`resolve_check_cmd`].
#[derive(Debug, Clone)]
pub struct CheckCmdSources {
    /// Value from `--check-cmd` / `FDR_CHECK_CMD`.
    pub explicit: Option<String>,
    pub project_config: PathBuf,
    pub system_config: Option<PathBuf>,
    pub project_root: PathBuf,
}

/// Walk the resolution chain and return the check command.
pub fn resolve_check_cmd(sources: &CheckCmdSources, prompter: &dyn Prompter) -> Result<String> {
    if let Some(cmd) = sources
        .explicit
        .as_deref()
        .map(str::trim)
        .filter(|cmd| !cmd.is_empty())
    {
        return Ok(cmd.to_string());
    }

    if let Some(cmd) = read_check_cmd(&sources.project_config) {
        info!(source = %sources.project_config.display(), "using check command from project config");
        return Ok(cmd);
    }

    if let Some(path) = &sources.system_config
        && let Some(cmd) = read_check_cmd(path)
    {
        if command_exists(&cmd, &sources.project_root) {
            info!(source = %path.display(), "using check command from system config");
            return Ok(cmd);
        }
        warn!(
            "System config check command '{cmd}' is not executable here; falling through to auto-detection"
        );
    }

    if let Some(found) = auto_detect(&sources.project_root) {
        if !prompter.is_interactive() {
            info!(command = %found.command, reason = %found.reason, "using auto-detected check command");
            return Ok(found.command);
        }
        let question = format!(
            "Detected check command: {} ({}). Use this command?",
            found.command, found.reason
        );
        if prompter.confirm(&question)? {
            persist(&sources.project_config, &found.command);
            return Ok(found.command);
        }
    }

    if !prompter.is_interactive() {
        bail!(
            "No check command configured. Pass --check-cmd, set FDR_CHECK_CMD, or add \
             check_cmd to {}",
            sources.project_config.display()
        );
    }

    for attempt in 1..=PROMPT_RETRIES {
        let answer = prompter.ask("Enter the command that runs your checks (e.g. 'make test'):")?;
        if !answer.is_empty() {
            persist(&sources.project_config, &answer);
            return Ok(answer);
        }
        let remaining = PROMPT_RETRIES - attempt;
        if remaining > 0 {
            warn!("Please enter a command. {remaining} attempt(s) remaining.");
        }
    }
    bail!("No command provided after {PROMPT_RETRIES} attempts")
}

fn persist(path: &Path, command: &str) {
    match persist_check_cmd(path, command) {
        Ok(()) => info!("Saved check command to {}", path.display()),
        Err(err) => warn!("Could not save config: {err:#}"),
    }
}
