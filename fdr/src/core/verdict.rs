//! Interpretation of the agent's review output.

/// Marker the review prompt asks the agent to write when nothing is wrong.
pub const NO_ISSUES_MARKER: &str = "NO_ISSUES";

const LEGACY_PHRASE: &str = "no critical issues found";

/// Outcome of reading `review_current.md`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Explicit marker, or the legacy phrase on its own.
    NoIssues,
    /// Empty output, accepted as no issues but worth a warning.
    EmptyNoIssues,
    IssuesFound,
}

impl Verdict {
    pub fn has_issues(self) -> bool {
        self == Verdict::IssuesFound
    }
}

/// Classify review content.
///
/// The legacy phrase only counts when at most one non-header line remains, so
/// an issues list that happens to contain it is still treated as issues.
pub fn interpret(content: &str) -> Verdict {
    let stripped = content.trim();
    if stripped == NO_ISSUES_MARKER {
        return Verdict::NoIssues;
    }
    if stripped.is_empty() {
        return Verdict::EmptyNoIssues;
    }
    if stripped.to_lowercase().contains(LEGACY_PHRASE) {
        let content_lines = content
            .lines()
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .count();
        if content_lines <= 1 {
            return Verdict::NoIssues;
        }
    }
    Verdict::IssuesFound
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_means_no_issues() {
        assert_eq!(interpret("NO_ISSUES\n"), Verdict::NoIssues);
        assert_eq!(interpret("  NO_ISSUES  "), Verdict::NoIssues);
    }

    #[test]
    fn empty_is_ambiguous_no_issues() {
        assert_eq!(interpret(""), Verdict::EmptyNoIssues);
        assert_eq!(interpret("\n \n"), Verdict::EmptyNoIssues);
        assert!(!Verdict::EmptyNoIssues.has_issues());
    }

    #[test]
    fn legacy_phrase_alone_is_no_issues() {
        assert_eq!(
            interpret("# Review\n\nNo critical issues found.\n"),
            Verdict::NoIssues
        );
    }

    #[test]
    fn legacy_phrase_inside_issue_list_is_issues() {
        let content = "No critical issues found, but:\n- missing test for parser\n";
        assert_eq!(interpret(content), Verdict::IssuesFound);
    }

    #[test]
    fn free_text_is_issues() {
        assert_eq!(interpret("- off-by-one in loop"), Verdict::IssuesFound);
        assert!(Verdict::IssuesFound.has_issues());
    }
}
