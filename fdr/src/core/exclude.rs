//! Paths kept out of agent context.

use std::path::{Component, Path};

use glob::{MatchOptions, Pattern};

/// Tool-owned state directory, relative to the project root.
pub const STATE_DIR: &str = ".fix-die-repeat";

/// Basename patterns for lockfiles and minified bundles.
pub const DEFAULT_PATTERNS: &[&str] = &["*.lock", "*-lock.json", "*-lock.yaml", "go.sum", "*.min.*"];

/// True if a relative path lives inside the state directory.
pub fn is_state_path(path: &str) -> bool {
    Path::new(path)
        .components()
        .find(|part| part != &Component::CurDir)
        .is_some_and(|first| first.as_os_str() == STATE_DIR)
}

/// True if the basename of `path` matches any default pattern (case-insensitive).
pub fn is_excluded_file(path: &str) -> bool {
    let name = Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };
    DEFAULT_PATTERNS.iter().any(|pattern| {
        Pattern::new(pattern)
            .map(|compiled| compiled.matches_with(&name, options))
            .unwrap_or(false)
    })
}
