//! Run settings and the `check_cmd` config files.
//!
//! `Settings` is built once by the binary and passed by reference into every
//! phase; nothing below the binary reads the environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::compaction::Thresholds;

/// Directory name under the user config home.
pub const APP_DIR: &str = "fix-die-repeat";

/// Resolved configuration for one run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Shell command whose exit code decides pass/fail.
    pub check_cmd: String,
    /// Outer iteration budget.
    pub max_iters: u32,
    /// Fix attempts allowed within one iteration.
    pub max_fix_attempts: u32,
    /// Review-fix attempts allowed within one iteration.
    pub max_review_fix_attempts: u32,
    /// Unresolved PR threads taken per iteration (`0` = no limit).
    pub max_pr_threads: usize,
    pub model: Option<String>,
    pub test_model: Option<String>,
    /// Comma-separated language override for prompt hints.
    pub languages: Option<String>,
    pub archive_artifacts: bool,
    pub compact_artifacts: bool,
    pub pr_review: bool,
    pub introspect: bool,
    pub debug: bool,
    pub ntfy_enabled: bool,
    pub ntfy_url: String,
    /// Agent executable.
    pub agent_program: String,
    /// Push/pull boundary in bytes.
    pub auto_attach_threshold: u64,
    pub compact_threshold_lines: usize,
    pub emergency_threshold_lines: usize,
    pub large_file_lines: usize,
    /// Minimum pause before every agent call after the first.
    pub agent_delay: Duration,
    /// Applies to check, agent, and hosting CLI calls when set.
    pub command_timeout: Option<Duration>,
    /// Cross-project introspection log.
    pub global_introspection_log: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            check_cmd: String::new(),
            max_iters: 10,
            max_fix_attempts: 10,
            max_review_fix_attempts: 3,
            max_pr_threads: 5,
            model: None,
            test_model: None,
            languages: None,
            archive_artifacts: false,
            compact_artifacts: true,
            pr_review: false,
            introspect: false,
            debug: false,
            ntfy_enabled: true,
            ntfy_url: "http://localhost:2586".to_string(),
            agent_program: "pi".to_string(),
            auto_attach_threshold: 200 * 1024,
            compact_threshold_lines: 150,
            emergency_threshold_lines: 200,
            large_file_lines: 2000,
            agent_delay: Duration::from_secs(1),
            command_timeout: None,
            global_introspection_log: None,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.check_cmd.trim().is_empty() {
            return Err(anyhow!("check command must not be empty"));
        }
        if self.max_iters == 0 {
            return Err(anyhow!(
                "Invalid configuration: FDR_MAX_ITERS must be a positive integer (got '0')"
            ));
        }
        if self.max_fix_attempts == 0 {
            return Err(anyhow!("max fix attempts must be > 0"));
        }
        if self.max_review_fix_attempts == 0 {
            return Err(anyhow!("max review fix attempts must be > 0"));
        }
        if self.compact_threshold_lines == 0 {
            return Err(anyhow!("compact threshold must be > 0"));
        }
        if self.emergency_threshold_lines < self.compact_threshold_lines {
            return Err(anyhow!(
                "emergency threshold ({}) must not be below compact threshold ({})",
                self.emergency_threshold_lines,
                self.compact_threshold_lines
            ));
        }
        if self.agent_program.trim().is_empty() {
            return Err(anyhow!("agent program must not be empty"));
        }
        Ok(())
    }

    pub fn compaction_thresholds(&self) -> Thresholds {
        Thresholds {
            compact_lines: self.compact_threshold_lines,
            emergency_lines: self.emergency_threshold_lines,
        }
    }
}

/// `$XDG_CONFIG_HOME/fix-die-repeat`, or `~/.config/fix-die-repeat`.
pub fn app_config_dir(xdg_config_home: Option<&str>) -> Option<PathBuf> {
    let base = match xdg_config_home.filter(|dir| !dir.trim().is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => dirs::home_dir()?.join(".config"),
    };
    Some(base.join(APP_DIR))
}

/// Contents of a project or system config file (TOML).
///
/// Unknown keys are ignored so newer files keep working.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub check_cmd: Option<String>,
}

/// Load a config file; a missing file yields the default.
///
/// Files that are not valid TOML fall back to reading a bare
/// `check_cmd = value` line.
pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    match toml::from_str::<FileConfig>(&contents) {
        Ok(cfg) => Ok(cfg),
        Err(err) => {
            warn!(path = %path.display(), err = %err, "config is not valid TOML; reading check_cmd line");
            Ok(FileConfig {
                check_cmd: legacy_check_cmd(&contents),
            })
        }
    }
}

/// Best-effort `check_cmd` from a config file; unreadable files count as unset.
pub fn read_check_cmd(path: &Path) -> Option<String> {
    match load_file_config(path) {
        Ok(cfg) => cfg.check_cmd.filter(|cmd| !cmd.trim().is_empty()),
        Err(err) => {
            warn!(path = %path.display(), err = %format!("{err:#}"), "ignoring unreadable config");
            None
        }
    }
}

/// Set `check_cmd` in a config file, keeping every other line.
pub fn persist_check_cmd(path: &Path, check_cmd: &str) -> Result<()> {
    let existing = if path.exists() {
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
    } else {
        String::new()
    };
    let entry = format!("check_cmd = {}", toml::Value::String(check_cmd.to_string()));

    let mut replaced = false;
    let mut lines: Vec<String> = existing
        .lines()
        .map(|line| {
            if is_check_cmd_line(line) {
                replaced = true;
                entry.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(entry);
    }
    let mut buf = lines.join("\n");
    buf.push('\n');
    write_atomic(path, &buf)
}

fn is_check_cmd_line(line: &str) -> bool {
    line.trim_start()
        .strip_prefix("check_cmd")
        .is_some_and(|rest| rest.trim_start().starts_with('='))
}

fn legacy_check_cmd(contents: &str) -> Option<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .find(|line| is_check_cmd_line(line))
        .and_then(|line| line.split_once('='))
        .map(|(_, value)| unquote(value.trim()).to_string())
        .filter(|value| !value.is_empty())
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
