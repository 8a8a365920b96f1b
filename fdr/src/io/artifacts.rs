//! File-backed run state under `.fix-die-repeat/`.
//!
//! Histories are append-only within an iteration and bounded by compaction;
//! every other artifact is overwritten per step. Missing files read as empty.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::core::check_log;
use crate::core::compaction::{self, Compaction, EMERGENCY_KEEP_LINES, Thresholds};
use crate::core::messages;
use crate::core::oscillation;
use crate::core::types::CheckOutput;
use crate::io::git::Git;
use crate::io::paths::FdrPaths;

/// Timestamp format used in review history headings.
pub const ENTRY_TIMESTAMP: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Current UTC time as used in history headings.
pub fn entry_timestamp() -> String {
    chrono::Utc::now().format(ENTRY_TIMESTAMP).to_string()
}

/// Local time stamp for archive folders and debug session logs.
pub fn file_stamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

pub fn read_or_empty(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

pub fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

pub fn append_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}

/// Delete a file; a missing file is not an error.
pub fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

/// True when the file exists and holds more than whitespace.
pub fn has_content(path: &Path) -> bool {
    fs::read_to_string(path)
        .map(|text| !text.trim().is_empty())
        .unwrap_or(false)
}

pub fn line_count(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|text| text.lines().count())
        .unwrap_or(0)
}

/// Typed access to the run's artifacts.
#[derive(Clone, Copy)]
pub struct ArtifactStore<'a> {
    paths: &'a FdrPaths,
}

impl<'a> ArtifactStore<'a> {
    pub fn new(paths: &'a FdrPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &'a FdrPaths {
        self.paths
    }

    /// Truncate per-run files (oscillation ledger, agent log).
    pub fn reset_run_files(&self) -> Result<()> {
        write_file(&self.paths.checks_hashes, "")?;
        write_file(&self.paths.agent_log, "")
    }

    fn monitored(&self) -> [&'a Path; 2] {
        [&self.paths.review, &self.paths.build_history]
    }

    /// Apply the compaction the current history sizes call for.
    pub fn compact(&self, thresholds: Thresholds) -> Result<Compaction> {
        let counts: Vec<usize> = self.monitored().iter().map(|p| line_count(p)).collect();
        let decision = compaction::plan(&counts, thresholds);
        match decision {
            Compaction::None => {}
            Compaction::Emergency => info!(
                "Emergency: artifacts exceed {} lines. Truncating to last {} lines...",
                thresholds.emergency_lines, EMERGENCY_KEEP_LINES
            ),
            Compaction::Regular => info!(
                "Artifacts exceed {} lines. Compacting...",
                thresholds.compact_lines
            ),
        }
        if let Some(keep) = decision.keep_lines() {
            self.truncate_monitored(keep)?;
        }
        Ok(decision)
    }

    /// Truncate both histories to the emergency size regardless of thresholds.
    pub fn emergency_compact(&self) -> Result<()> {
        info!("Forcing emergency compaction of review and build history");
        self.truncate_monitored(EMERGENCY_KEEP_LINES)
    }

    fn truncate_monitored(&self, keep: usize) -> Result<()> {
        for path in self.monitored() {
            if !path.exists() {
                continue;
            }
            let text = read_or_empty(path)?;
            let before = text.lines().count();
            let kept = compaction::keep_tail(&text, keep);
            write_file(path, &kept)?;
            debug!(file = %path.display(), before, after = kept.lines().count(), "compacted");
        }
        Ok(())
    }

    /// Persist the raw check output and its filtered digest.
    pub fn write_check_output(&self, output: &CheckOutput) -> Result<()> {
        write_file(&self.paths.checks_log, &output.output)?;
        self.filter_checks_log()
    }

    /// Regenerate `checks_filtered.log` from `checks.log`.
    pub fn filter_checks_log(&self) -> Result<()> {
        let raw = read_or_empty(&self.paths.checks_log)?;
        let source = self.paths.relative(&self.paths.checks_log);
        let filtered = check_log::filter(&raw, &source);
        let (before, after) = (raw.lines().count(), filtered.lines().count());
        if before != after {
            info!("Filtered checks.log: {before} -> {after} lines");
        }
        write_file(&self.paths.checks_filtered_log, &filtered)
    }

    /// Record this iteration's check-log hash; warn if an earlier one matched.
    pub fn check_oscillation(&self, git: &Git<'_>, iteration: u32) -> Result<Option<String>> {
        let hash = content_hash(git, &self.paths.checks_log);
        let ledger = read_or_empty(&self.paths.checks_hashes)?;
        let warning = oscillation::previous_iteration(&ledger, &hash).map(|previous| {
            info!("Detected oscillation: iteration {iteration} matches iteration {previous}");
            messages::oscillation_warning(previous)
        });
        append_file(
            &self.paths.checks_hashes,
            &oscillation::ledger_entry(&hash, iteration),
        )?;
        Ok(warning)
    }

    pub fn record_fix_noop(&self, iteration: u32, attempt: u32) -> Result<()> {
        append_file(
            &self.paths.build_history,
            &format!(
                "## Iteration {iteration} fix attempt {attempt}: FAILED to apply fixes (no files changed)\n\n"
            ),
        )
    }

    pub fn record_fix_applied(&self, iteration: u32, attempt: u32, stat: &str) -> Result<()> {
        append_file(
            &self.paths.build_history,
            &format!("## Iteration {iteration} fix attempt {attempt}\n{}\n\n", stat.trim_end()),
        )
    }

    pub fn record_review_fix_applied(&self, iteration: u32, attempt: u32, stat: &str) -> Result<()> {
        append_file(
            &self.paths.build_history,
            &format!(
                "## Iteration {iteration} Review Fixes (attempt {attempt})\n{}\n\n",
                stat.trim_end()
            ),
        )
    }

    /// Append this iteration's review verdict to the review history.
    pub fn record_review(&self, iteration: u32, findings: &str) -> Result<()> {
        let body = if findings.trim().is_empty() {
            "_No issues found._\n".to_string()
        } else {
            let mut body = findings.trim_end().to_string();
            body.push('\n');
            body
        };
        append_file(
            &self.paths.review,
            &format!("## Iteration {iteration} - Review ({})\n{body}\n", entry_timestamp()),
        )
    }

    pub fn record_resolution_pending(&self, iteration: u32, attempt: u32) -> Result<()> {
        let current = self.paths.relative(&self.paths.review_current);
        append_file(
            &self.paths.review,
            &format!(
                "### Iteration {iteration} - Resolution ({})\n- Fixes applied for {current} (attempt {attempt}); verification pending.\n\n",
                entry_timestamp()
            ),
        )
    }

    pub fn record_resolution_clean(&self, iteration: u32) -> Result<()> {
        append_file(
            &self.paths.review,
            &format!(
                "### Iteration {iteration} - Resolution ({})\n- No issues found.\n\n",
                entry_timestamp()
            ),
        )
    }

    /// Refresh `review_recent.md` with the tail of the review history.
    pub fn write_recent_review(&self, keep: usize) -> Result<bool> {
        let review = read_or_empty(&self.paths.review)?;
        if review.trim().is_empty() {
            remove_file(&self.paths.review_recent)?;
            return Ok(false);
        }
        write_file(&self.paths.review_recent, &compaction::keep_tail(&review, keep))?;
        Ok(true)
    }
}

/// Deterministic content hash of a log file.
///
/// Uses `git hash-object` when available, SHA-256 otherwise; a missing file
/// hashes to `no_file_<name>`.
pub fn content_hash(git: &Git<'_>, path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let Ok(bytes) = fs::read(path) else {
        return format!("no_file_{name}");
    };
    match git.hash_object(path) {
        Ok(hash) if !hash.is_empty() => hash,
        Ok(_) | Err(_) => {
            warn!(file = %path.display(), "git hash-object unavailable; using sha256");
            hex::encode(Sha256::digest(&bytes))
        }
    }
}
