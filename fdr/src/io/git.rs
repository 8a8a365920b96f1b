//! Git adapter for the fix loop.
//!
//! Git is the source of truth for "what changed", so every query the loop
//! needs is a small, explicit wrapper around one porcelain command.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use crate::io::process::{CommandOutput, CommandRunner, CommandSpec};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Clone, Copy)]
pub struct Git<'a> {
    runner: &'a dyn CommandRunner,
    workdir: &'a Path,
}

impl<'a> Git<'a> {
    pub fn new(runner: &'a dyn CommandRunner, workdir: &'a Path) -> Self {
        Self { runner, workdir }
    }

    pub fn workdir(&self) -> &Path {
        self.workdir
    }

    /// Repository root containing the working directory.
    pub fn toplevel(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Full SHA of `HEAD`.
    #[instrument(skip_all)]
    pub fn head_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Current branch name, `None` on a detached HEAD.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let out = self.run_capture(&["branch", "--show-current"])?;
        let name = out.trim();
        debug!(branch = %name, "current branch");
        Ok((!name.is_empty()).then(|| name.to_string()))
    }

    /// Working-tree diff against `base`, or against `HEAD` when absent.
    pub fn diff(&self, base: Option<&str>) -> Result<String> {
        self.run_capture(&["diff", base.unwrap_or("HEAD")])
    }

    /// `git diff --stat` of unstaged changes.
    pub fn diff_stat(&self) -> Result<String> {
        self.run_capture(&["diff", "--stat"])
    }

    /// Paths with unstaged (`cached == false`) or staged changes.
    pub fn diff_names(&self, cached: bool) -> Result<Vec<String>> {
        let args: &[&str] = if cached {
            &["diff", "--cached", "--name-only"]
        } else {
            &["diff", "--name-only"]
        };
        Ok(non_empty_lines(&self.run_capture(args)?))
    }

    /// Untracked paths, honouring ignore rules.
    pub fn untracked_files(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["ls-files", "--others", "--exclude-standard"])?;
        Ok(non_empty_lines(&out))
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Content hash of a file as git would store it.
    pub fn hash_object(&self, path: &Path) -> Result<String> {
        let path = path.to_string_lossy();
        let out = self.run_capture(&["hash-object", path.as_ref()])?;
        Ok(out.trim().to_string())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(output.stdout_text())
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(args)?;
        if !output.success() {
            let stderr = output.stderr_text();
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let spec = CommandSpec::new("git")
            .args(args.iter().copied())
            .current_dir(self.workdir);
        self.runner.run(&spec)
    }
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
