//! Layout of the `.fix-die-repeat/` state directory.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::exclude::STATE_DIR;

const IGNORE_ENTRY: &str = ".fix-die-repeat/";

/// All canonical paths within `.fix-die-repeat/` for a project root.
#[derive(Debug, Clone)]
pub struct FdrPaths {
    pub root: PathBuf,
    pub fdr_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub project_config: PathBuf,
    pub review: PathBuf,
    pub review_current: PathBuf,
    pub review_recent: PathBuf,
    pub build_history: PathBuf,
    pub checks_log: PathBuf,
    pub checks_filtered_log: PathBuf,
    pub checks_hashes: PathBuf,
    pub agent_log: PathBuf,
    pub fdr_log: PathBuf,
    pub diff: PathBuf,
    pub start_sha: PathBuf,
    pub pr_threads_cache: PathBuf,
    pub pr_threads_key: PathBuf,
    pub pr_thread_ids: PathBuf,
    pub resolved_threads: PathBuf,
    pub cumulative_in_scope: PathBuf,
    pub cumulative_resolved: PathBuf,
    pub cumulative_threads: PathBuf,
    pub introspection_data: PathBuf,
    pub introspection_result: PathBuf,
    pub model_test_result: PathBuf,
}

impl FdrPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let fdr_dir = root.join(STATE_DIR);
        Self {
            root: root.clone(),
            fdr_dir: fdr_dir.clone(),
            archive_dir: fdr_dir.join("archive"),
            project_config: fdr_dir.join("config"),
            review: fdr_dir.join("review.md"),
            review_current: fdr_dir.join("review_current.md"),
            review_recent: fdr_dir.join("review_recent.md"),
            build_history: fdr_dir.join("build_history.md"),
            checks_log: fdr_dir.join("checks.log"),
            checks_filtered_log: fdr_dir.join("checks_filtered.log"),
            checks_hashes: fdr_dir.join(".checks_hashes"),
            agent_log: fdr_dir.join("pi.log"),
            fdr_log: fdr_dir.join("fdr.log"),
            diff: fdr_dir.join("changes.diff"),
            start_sha: fdr_dir.join(".start_sha"),
            pr_threads_cache: fdr_dir.join(".pr_threads_cache"),
            pr_threads_key: fdr_dir.join(".pr_threads_hash"),
            pr_thread_ids: fdr_dir.join(".pr_thread_ids_in_scope"),
            resolved_threads: fdr_dir.join(".resolved_threads"),
            cumulative_in_scope: fdr_dir.join(".cumulative_in_scope_threads"),
            cumulative_resolved: fdr_dir.join(".cumulative_resolved_threads"),
            cumulative_threads: fdr_dir.join(".cumulative_pr_threads.md"),
            introspection_data: fdr_dir.join("introspection_data.yaml"),
            introspection_result: fdr_dir.join("introspection_result.yaml"),
            model_test_result: fdr_dir.join(".model_test_result.txt"),
        }
    }

    /// Path of a state file relative to the project root, for prompts.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    /// Session log for this run (timestamped in debug mode).
    pub fn session_log(&self, debug: bool, stamp: &str) -> PathBuf {
        if debug {
            self.fdr_dir.join(format!("session_{stamp}.log"))
        } else {
            self.fdr_dir.join("session.log")
        }
    }

    /// Create the state directory and keep it out of version control.
    pub fn ensure_state_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.fdr_dir)
            .with_context(|| format!("create {}", self.fdr_dir.display()))?;
        self.ensure_ignored()
    }

    fn ensure_ignored(&self) -> Result<()> {
        let gitignore = self.root.join(".gitignore");
        if gitignore.exists() {
            return append_ignore_entry(&gitignore);
        }
        let git_dir = self.root.join(".git");
        if git_dir.is_dir() {
            let info_dir = git_dir.join("info");
            fs::create_dir_all(&info_dir)
                .with_context(|| format!("create {}", info_dir.display()))?;
            return append_ignore_entry(&info_dir.join("exclude"));
        }
        debug!("no git metadata found; state directory left unignored");
        Ok(())
    }

    /// Move every regular file in the state directory into `archive/<stamp>/`.
    pub fn archive_artifacts(&self, stamp: &str) -> Result<PathBuf> {
        let target = self.archive_dir.join(stamp);
        info!("Archiving existing artifacts to {}", target.display());
        fs::create_dir_all(&target).with_context(|| format!("create {}", target.display()))?;
        let entries = fs::read_dir(&self.fdr_dir)
            .with_context(|| format!("read {}", self.fdr_dir.display()))?;
        for entry in entries {
            let entry = entry.context("read state dir entry")?;
            let path = entry.path();
            if path.is_file() {
                let dest = target.join(entry.file_name());
                fs::rename(&path, &dest)
                    .with_context(|| format!("move {} to {}", path.display(), dest.display()))?;
            }
        }
        Ok(target)
    }
}

fn append_ignore_entry(path: &Path) -> Result<()> {
    let existing = fs::read_to_string(path).unwrap_or_default();
    if existing
        .lines()
        .any(|line| line.trim() == IGNORE_ENTRY || line.trim() == STATE_DIR)
    {
        return Ok(());
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    let prefix = if existing.is_empty() || existing.ends_with('\n') {
        ""
    } else {
        "\n"
    };
    writeln!(file, "{prefix}{IGNORE_ENTRY}").with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
