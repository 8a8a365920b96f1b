//! In-scope enforcement for agent-reported thread resolutions.

use std::collections::BTreeSet;

/// Agent-reported IDs split by whether they may be resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeCheck {
    /// Reported IDs present in the in-scope set, in report order.
    pub allowed: Vec<String>,
    /// Reported IDs absent from the in-scope set, in report order.
    pub rejected: Vec<String>,
}

/// Parse a newline-separated ID file, dropping blanks and duplicates.
pub fn parse_ids(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    text.lines()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

/// Intersect `reported` with `in_scope`.
pub fn partition(reported: &[String], in_scope: &[String]) -> ScopeCheck {
    let scope: BTreeSet<&str> = in_scope.iter().map(String::as_str).collect();
    let mut seen = BTreeSet::new();
    let mut check = ScopeCheck::default();
    for id in reported {
        if !seen.insert(id.as_str()) {
            continue;
        }
        if scope.contains(id.as_str()) {
            check.allowed.push(id.clone());
        } else {
            check.rejected.push(id.clone());
        }
    }
    check
}
