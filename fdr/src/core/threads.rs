//! Review-thread model, volume limiting, and prompt formatting.
//!
//! Threads arrive from the hosting API already validated (see
//! `io::github`); everything here is deterministic over that input.

use std::cmp::Reverse;

/// One comment in a review thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadComment {
    pub author: Option<String>,
    pub body: String,
    /// ISO-8601 creation time as reported by the API.
    pub created_at: Option<String>,
}

/// A PR review thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewThread {
    /// Opaque thread ID used by the resolve mutation.
    pub id: String,
    pub is_resolved: bool,
    pub path: Option<String>,
    pub line: Option<u64>,
    /// Oldest first.
    pub comments: Vec<ThreadComment>,
}

impl ReviewThread {
    /// Latest comment timestamp, or `""` when no comment carries one.
    pub fn latest_comment_at(&self) -> &str {
        self.comments
            .iter()
            .filter_map(|comment| comment.created_at.as_deref())
            .max()
            .unwrap_or("")
    }
}

/// Threads split into the in-scope set and those left for a later iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimitedThreads {
    pub kept: Vec<ReviewThread>,
    pub skipped: Vec<ReviewThread>,
}

/// Order threads newest first and keep at most `max` (`0` keeps all).
///
/// Ties on the latest timestamp break on the thread ID, descending, so the
/// result is stable even when timestamps are missing.
pub fn limit(mut threads: Vec<ReviewThread>, max: usize) -> LimitedThreads {
    threads.sort_by_cached_key(|thread| {
        Reverse((thread.latest_comment_at().to_string(), thread.id.clone()))
    });
    if max == 0 || threads.len() <= max {
        return LimitedThreads {
            kept: threads,
            skipped: Vec::new(),
        };
    }
    let skipped = threads.split_off(max);
    LimitedThreads {
        kept: threads,
        skipped,
    }
}

/// Format one comment as `[author]: first line` with continuation lines
/// indented, so a body can never start a line that looks like a thread header.
pub fn format_comment(author: &str, body: &str) -> Vec<String> {
    let mut lines = body.lines();
    let first = lines.next().unwrap_or("");
    let mut out = vec![format!("[{author}]: {first}")];
    out.extend(lines.map(|line| format!("    {line}")));
    out
}

/// Render threads as numbered blocks.
pub fn format_threads(threads: &[ReviewThread]) -> String {
    let mut out = Vec::new();
    for (index, thread) in threads.iter().enumerate() {
        out.push(format!("--- Thread #{} ---", index + 1));
        out.push(format!("ID: {}", thread.id));
        out.push(format!("File: {}", thread.path.as_deref().unwrap_or("N/A")));
        if let Some(line) = thread.line.filter(|line| *line > 0) {
            out.push(format!("Line: {line}"));
        }
        for comment in &thread.comments {
            let author = comment.author.as_deref().unwrap_or("unknown");
            out.extend(format_comment(author, &comment.body));
        }
        out.push(String::new());
    }
    out.join("\n")
}

/// Thread IDs in display order.
pub fn thread_ids(threads: &[ReviewThread]) -> Vec<String> {
    threads.iter().map(|thread| thread.id.clone()).collect()
}
