//! Push/pull sizing for agent context.

use crate::core::types::ContextMode;

/// Choose push (attach) when `total_bytes` fits the threshold, pull otherwise.
pub fn choose_mode(total_bytes: u64, threshold: u64) -> ContextMode {
    if total_bytes > threshold {
        ContextMode::Pull
    } else {
        ContextMode::Push
    }
}

/// File-list instruction used in pull mode.
pub fn pull_file_list(files: &[String], total_bytes: u64) -> String {
    let mut out = format!(
        "The following files have changed but are too large to pre-load automatically \
         ({total_bytes} bytes total). You MUST use the 'read' tool to inspect the ones \
         relevant to the error:"
    );
    for file in files {
        out.push_str("\n- ");
        out.push_str(file);
    }
    out
}

/// Files whose line count exceeds `threshold_lines`, in input order.
pub fn large_files(line_counts: &[(String, usize)], threshold_lines: usize) -> Vec<(String, usize)> {
    line_counts
        .iter()
        .filter(|(_, lines)| *lines > threshold_lines)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_boundary_is_strict() {
        assert_eq!(choose_mode(100, 100), ContextMode::Push);
        assert_eq!(choose_mode(101, 100), ContextMode::Pull);
        assert_eq!(choose_mode(0, 100), ContextMode::Push);
    }

    #[test]
    fn pull_list_names_every_file() {
        let files = vec!["src/a.rs".to_string(), "src/b.rs".to_string()];
        let text = pull_file_list(&files, 4096);
        assert!(text.contains("4096 bytes total"));
        assert!(text.ends_with("- src/a.rs\n- src/b.rs"));
    }

    #[test]
    fn large_files_filters_by_line_count() {
        let counts = vec![("big.rs".to_string(), 2001), ("ok.rs".to_string(), 2000)];
        assert_eq!(large_files(&counts, 2000), vec![("big.rs".to_string(), 2001)]);
    }
}
