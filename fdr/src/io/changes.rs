//! What the working tree changed, as seen by git.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::core::exclude::{is_excluded_file, is_state_path};
use crate::io::git::{Git, StatusEntry};

/// Sorted, de-duplicated staged, unstaged and untracked files.
///
/// Each sub-query is best-effort; entries that are not existing regular
/// files, live in the state directory, or match an exclude pattern are
/// dropped.
pub fn changed_files(git: &Git<'_>) -> Vec<String> {
    let mut all = BTreeSet::new();
    for (label, result) in [
        ("staged", git.diff_names(true)),
        ("unstaged", git.diff_names(false)),
        ("untracked", git.untracked_files()),
    ] {
        match result {
            Ok(files) => all.extend(files),
            Err(err) => debug!(query = label, err = %format!("{err:#}"), "git query failed; treating as empty"),
        }
    }
    all.into_iter()
        .filter(|path| !is_state_path(path) && !is_excluded_file(path))
        .filter(|path| git.workdir().join(path).is_file())
        .collect()
}

/// Size and line count of one changed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub path: String,
    pub bytes: u64,
    pub lines: usize,
}

pub fn measure(root: &Path, files: &[String]) -> Vec<FileStat> {
    files
        .iter()
        .map(|path| {
            let full = root.join(path);
            let bytes = fs::metadata(&full).map(|m| m.len()).unwrap_or(0);
            let lines = fs::read(&full)
                .map(|data| data.iter().filter(|&&b| b == b'\n').count())
                .unwrap_or(0);
            FileStat {
                path: path.clone(),
                bytes,
                lines,
            }
        })
        .collect()
}

/// Pseudo-diff block that presents an untracked file as newly added.
pub fn untracked_file_diff(root: &Path, path: &str) -> String {
    let mut out = format!(
        "diff --git a/{path} b/{path}\nnew file mode 100644\n--- /dev/null\n+++ b/{path}\n"
    );
    match fs::read(root.join(path)) {
        Ok(data) if data.contains(&0) => {
            out.push_str(&format!("Binary file {path} differs\n"));
        }
        Ok(data) => {
            for line in String::from_utf8_lossy(&data).lines() {
                out.push('+');
                out.push_str(line);
                out.push('\n');
            }
        }
        Err(err) => warn!(file = %path, err = %err, "unable to read untracked file for diff"),
    }
    out.push('\n');
    out
}

/// Working-tree fingerprint used to decide whether an agent call changed anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSnapshot {
    status: Vec<StatusEntry>,
    diff: String,
    untracked: BTreeMap<String, String>,
}

impl TreeSnapshot {
    /// Capture the current tree state; git failures yield an empty snapshot part.
    pub fn capture(git: &Git<'_>) -> Self {
        let status: Vec<StatusEntry> = git
            .status_porcelain()
            .unwrap_or_default()
            .into_iter()
            .filter(|entry| !is_state_path(&entry.path))
            .collect();
        let diff = git.diff(None).unwrap_or_default();
        let untracked = status
            .iter()
            .filter(|entry| entry.code == "??")
            .map(|entry| {
                let digest = fs::read(git.workdir().join(&entry.path))
                    .map(|data| hex::encode(Sha256::digest(&data)))
                    .unwrap_or_default();
                (entry.path.clone(), digest)
            })
            .collect();
        Self {
            status,
            diff,
            untracked,
        }
    }

    /// No pending changes at all.
    pub fn is_clean(&self) -> bool {
        self.status.is_empty()
    }

    /// Whether the tree differs from an earlier snapshot.
    pub fn changed_since(&self, before: &TreeSnapshot) -> bool {
        self != before
    }
}
