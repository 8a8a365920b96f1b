//! Ruff rules that must never be silenced through `per-file-ignores`.

use std::collections::{BTreeMap, BTreeSet};

use toml::{Table, Value};

/// Rules whose per-file ignores stop the run.
pub const PROHIBITED_RUFF_RULES: &[&str] = &["C901", "PLC0415", "PLR0913", "PLR2004"];

/// File pattern to the prohibited rules it ignores.
pub type RuffViolations = BTreeMap<String, BTreeSet<String>>;

/// Scan `pyproject.toml` text for prohibited entries under
/// `[tool.ruff.lint.per-file-ignores]`.
///
/// Non-list values are skipped. Invalid TOML is an error.
pub fn find_prohibited_ignores(pyproject: &str) -> Result<RuffViolations, toml::de::Error> {
    let config: Table = toml::from_str(pyproject)?;
    let mut violations = RuffViolations::new();

    let Some(per_file) = ["tool", "ruff", "lint", "per-file-ignores"]
        .iter()
        .try_fold(&config, |table, key| table.get(*key)?.as_table())
    else {
        return Ok(violations);
    };

    for (pattern, rules) in per_file {
        let Value::Array(rules) = rules else { continue };
        for rule in rules.iter().filter_map(Value::as_str) {
            if PROHIBITED_RUFF_RULES.contains(&rule) {
                violations
                    .entry(pattern.clone())
                    .or_default()
                    .insert(rule.to_string());
            }
        }
    }
    Ok(violations)
}
