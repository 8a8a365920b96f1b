//! User-facing message text shared by the loop phases.

/// Command that shows everything changed since `start_sha`.
pub fn git_diff_instructions(start_sha: &str) -> String {
    format!("To see all changes made: git diff {start_sha}")
}

/// Command that reverts the working tree to `start_sha`.
pub fn git_checkout_instructions(start_sha: &str) -> String {
    format!("To revert all changes:   git checkout {start_sha} -- .")
}

/// Both rollback lines, in the order they are printed.
pub fn rollback_instructions(start_sha: &str) -> Vec<String> {
    vec![
        git_diff_instructions(start_sha),
        git_checkout_instructions(start_sha),
    ]
}

/// Told to the agent when the check output repeats an earlier iteration.
pub fn oscillation_warning(previous_iteration: u32) -> String {
    format!(
        "WARNING: Check output is IDENTICAL to iteration {previous_iteration}. You are going \
         in CIRCLES. Your previous approach did NOT work. You MUST try a fundamentally \
         DIFFERENT strategy."
    )
}

/// Warning block for changed files the agent's read tool would truncate.
///
/// Empty when `files` is empty.
pub fn large_file_warning(files: &[(String, usize)], threshold_lines: usize) -> String {
    if files.is_empty() {
        return String::new();
    }
    let mut parts = vec![format!(
        "CRITICAL WARNING: The following files are >{threshold_lines} lines and will be \
         TRUNCATED by the 'read' tool:"
    )];
    parts.extend(
        files
            .iter()
            .map(|(path, lines)| format!("- {path} ({lines} lines)")),
    );
    parts.push(String::new());
    parts.push(
        "[CRITICAL]: You CANNOT see the bottom of these files. If errors occur there, you \
         are flying blind."
            .to_string(),
    );
    parts.push(format!(
        "STRONGLY RECOMMENDED: Split these files into smaller files or modules to bring them \
         under the {threshold_lines}-line limit.\n  - If the file contains tests at the \
         bottom, move them to a separate test file.\n  - If it is a large logic file, \
         extract cohesive functionality into separate source files or subfolders."
    ));
    parts.join("\n")
}

/// Models to suggest after a failed model test.
pub fn model_recommendations() -> String {
    [
        "RECOMMENDATION: Try a different model:",
        "  - anthropic/claude-sonnet-4-5 (recommended for code editing)",
        "  - anthropic/claude-opus-4-6 (high capacity, more expensive)",
        "  - github-copilot/gpt-5.2-codex (good for code generation)",
    ]
    .join("\n")
}

/// Threads dropped by the per-iteration limit.
pub fn threads_out_of_scope_warning(ids: &[String]) -> String {
    format!(
        "WARNING: {} unresolved thread(s) are out of scope this iteration: {}",
        ids.len(),
        ids.join(", ")
    )
}

/// Threads reported resolved that were never in scope.
pub fn threads_not_in_scope_warning(ids: &[String]) -> String {
    format!(
        "WARNING: Model reported {} thread(s) NOT in scope: {}",
        ids.len(),
        ids.join(", ")
    )
}

/// Human-readable duration (`1h 2m 3s`, `2m 3s`, `3s`).
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_mentions_start_sha() {
        let lines = rollback_instructions("abc123");
        assert_eq!(lines[0], "To see all changes made: git diff abc123");
        assert!(lines[1].contains("git checkout abc123 -- ."));
    }

    #[test]
    fn oscillation_names_previous_iteration() {
        assert!(oscillation_warning(3).contains("IDENTICAL to iteration 3"));
    }

    #[test]
    fn large_file_warning_lists_files() {
        assert_eq!(large_file_warning(&[], 2000), "");
        let text = large_file_warning(&[("src/big.rs".to_string(), 2500)], 2000);
        assert!(text.starts_with("CRITICAL WARNING"));
        assert!(text.contains("- src/big.rs (2500 lines)"));
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(5), "5s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3725), "1h 2m 5s");
    }
}
