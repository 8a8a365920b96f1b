//! Size ceilings for the growing history artifacts.
//!
//! Planning is pure: callers pass the line count of every monitored file and
//! get back which truncation (if any) applies to the whole set.

/// Lines kept by a regular compaction.
pub const REGULAR_KEEP_LINES: usize = 50;
/// Lines kept by an emergency compaction.
pub const EMERGENCY_KEEP_LINES: usize = 100;

/// Compaction decision for the monitored artifact set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compaction {
    None,
    Regular,
    Emergency,
}

impl Compaction {
    /// Number of trailing lines every monitored file keeps, if truncating.
    pub fn keep_lines(self) -> Option<usize> {
        match self {
            Compaction::None => None,
            Compaction::Regular => Some(REGULAR_KEEP_LINES),
            Compaction::Emergency => Some(EMERGENCY_KEEP_LINES),
        }
    }
}

/// Line-count thresholds evaluated against each monitored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub compact_lines: usize,
    pub emergency_lines: usize,
}

/// Decide the compaction for a set of files given their line counts.
///
/// Emergency dominates: one file over the hard threshold truncates all of them.
pub fn plan(line_counts: &[usize], thresholds: Thresholds) -> Compaction {
    if line_counts
        .iter()
        .any(|&lines| lines > thresholds.emergency_lines)
    {
        return Compaction::Emergency;
    }
    if line_counts
        .iter()
        .any(|&lines| lines > thresholds.compact_lines)
    {
        return Compaction::Regular;
    }
    Compaction::None
}

/// Keep the last `keep` lines of `text`, preserving a trailing newline.
pub fn keep_tail(text: &str, keep: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(keep);
    let mut out = lines[start..].join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLDS: Thresholds = Thresholds {
        compact_lines: 150,
        emergency_lines: 200,
    };

    #[test]
    fn below_soft_threshold_is_noop() {
        assert_eq!(plan(&[0, 150], THRESHOLDS), Compaction::None);
        assert_eq!(plan(&[], THRESHOLDS), Compaction::None);
        assert_eq!(Compaction::None.keep_lines(), None);
    }

    #[test]
    fn soft_threshold_triggers_regular() {
        assert_eq!(plan(&[151, 3], THRESHOLDS), Compaction::Regular);
        assert_eq!(Compaction::Regular.keep_lines(), Some(50));
    }

    #[test]
    fn emergency_dominates_regular() {
        assert_eq!(plan(&[160, 201], THRESHOLDS), Compaction::Emergency);
        assert_eq!(plan(&[201, 10], THRESHOLDS), Compaction::Emergency);
        assert_eq!(Compaction::Emergency.keep_lines(), Some(100));
    }

    #[test]
    fn keep_tail_keeps_most_recent_lines() {
        let text = "a\nb\nc\nd\n";
        assert_eq!(keep_tail(text, 2), "c\nd\n");
        assert_eq!(keep_tail(text, 10), "a\nb\nc\nd\n");
        assert_eq!(keep_tail("", 3), "");
    }
}
