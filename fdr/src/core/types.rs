//! Shared deterministic types for the fix loop.
//!
//! These types define contracts between the loop phases. They do not depend
//! on external state or I/O.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// Result of one check-command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutput {
    /// Process exit code (`None` when the command was killed).
    pub exit_code: Option<i32>,
    /// Combined stdout followed by stderr.
    pub output: String,
}

impl CheckOutput {
    pub fn passed(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn byte_size(&self) -> usize {
        self.output.len()
    }
}

/// How changed content is handed to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// Full contents are attached to the invocation.
    Push,
    /// Only a file list is given; the agent reads on demand.
    Pull,
}

impl ContextMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextMode::Push => "push",
            ContextMode::Pull => "pull",
        }
    }
}

/// Which run budget was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    FixAttempts,
    Iterations,
}

/// Fatal run failure: a fix-attempt or iteration budget ran out.
///
/// Carries the starting commit so the caller can print rollback instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetExhausted {
    pub budget: Budget,
    pub limit: u32,
    pub start_sha: Option<String>,
}

impl fmt::Display for BudgetExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.budget {
            Budget::FixAttempts => write!(
                f,
                "maximum fix attempts ({}) exhausted; could not resolve check failures",
                self.limit
            ),
            Budget::Iterations => write!(
                f,
                "maximum iterations ({}) exceeded; could not resolve all issues",
                self.limit
            ),
        }
    }
}

impl std::error::Error for BudgetExhausted {}

/// Fatal: the project configuration breaks a policy the loop enforces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    /// Prohibited ruff rules under `per-file-ignores`, keyed by file pattern.
    ProhibitedRuffIgnores(BTreeMap<String, BTreeSet<String>>),
    /// `pyproject.toml` exists but does not parse.
    UnparseableRuffConfig { path: PathBuf, message: String },
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyViolation::ProhibitedRuffIgnores(violations) => {
                let patterns: Vec<&str> = violations.keys().map(String::as_str).collect();
                write!(
                    f,
                    "prohibited ruff rules ignored in per-file-ignores for {}",
                    patterns.join(", ")
                )
            }
            PolicyViolation::UnparseableRuffConfig { path, message } => {
                write!(f, "failed to parse ruff config {}: {message}", path.display())
            }
        }
    }
}

impl std::error::Error for PolicyViolation {}

/// A child process was terminated by an interrupt signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("interrupted by user")
    }
}

impl std::error::Error for Interrupted {}
