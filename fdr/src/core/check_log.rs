//! Error-focused digest of a raw check log.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

/// Logs at or under this many lines pass through unchanged.
pub const MAX_LINES: usize = 300;
/// Lines of context kept around each matched error line.
pub const CONTEXT_LINES: usize = 3;
/// Trailing lines of the raw log always kept verbatim.
pub const TAIL_LINES: usize = 80;

static ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(error[:\[ ]|fatal|failed|panic|exception|undefined reference|cannot find|no such file|not found|segfault|abort|compilation failed|build failed|assert)",
    )
    .expect("error pattern is valid")
});

/// Reduce `raw` to matched error lines with context plus the log tail.
///
/// `source` names the full log in the digest header.
pub fn filter(raw: &str, source: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    let total = lines.len();
    if total <= MAX_LINES {
        return raw.to_string();
    }

    let mut out: Vec<String> = vec![
        format!("=== FILTERED CHECK OUTPUT (full log: {source}, {total} lines) ==="),
        String::new(),
        "--- Error/failure lines with context ---".to_string(),
    ];

    let mut seen = BTreeSet::new();
    for (index, line) in lines.iter().enumerate() {
        if !ERROR_LINE.is_match(line) {
            continue;
        }
        let start = index.saturating_sub(CONTEXT_LINES);
        let end = (index + CONTEXT_LINES + 1).min(total);
        for j in start..end {
            if seen.insert(j) {
                out.push(lines[j].to_string());
            }
        }
    }

    let tail = &lines[total - TAIL_LINES..];
    out.push(String::new());
    out.push(format!("--- Last {TAIL_LINES} lines ---"));
    out.extend(tail.iter().map(|line| line.to_string()));

    if out.len() > MAX_LINES {
        out.truncate(MAX_LINES - TAIL_LINES);
        out.extend(tail.iter().map(|line| line.to_string()));
    }

    out.join("\n")
}
