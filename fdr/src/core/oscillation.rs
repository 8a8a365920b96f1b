//! Lookup in the append-only ledger of check-log hashes.
//!
//! The ledger stores one `hash:iteration` pair per line.

/// Format a ledger entry (including the trailing newline).
pub fn ledger_entry(hash: &str, iteration: u32) -> String {
    format!("{hash}:{iteration}\n")
}

/// Return the most recent earlier iteration that recorded `hash`.
///
/// Malformed lines are ignored.
pub fn previous_iteration(ledger: &str, hash: &str) -> Option<u32> {
    ledger
        .lines()
        .rev()
        .filter_map(|line| line.rsplit_once(':'))
        .find(|(recorded, _)| *recorded == hash)
        .and_then(|(_, iteration)| iteration.trim().parse().ok())
}
