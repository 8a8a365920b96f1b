//! Failure signatures recognised in agent output.

/// Model capacity exhausted (HTTP 503 or "no capacity").
pub fn is_capacity_error(output: &str) -> bool {
    output.contains("503") || output.to_lowercase().contains("no capacity")
}

/// Long-context rate limit (HTTP 429 mentioning long context).
pub fn is_long_context_error(output: &str) -> bool {
    let lower = output.to_lowercase();
    lower.contains("429") && lower.contains("long context")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_signature() {
        assert!(is_capacity_error("HTTP 503 Service Unavailable"));
        assert!(is_capacity_error("No capacity available for model"));
        assert!(!is_capacity_error("429 too many requests"));
    }

    #[test]
    fn long_context_signature_needs_both_parts() {
        assert!(is_long_context_error("Error 429: Long Context requests are limited"));
        assert!(!is_long_context_error("Error 429: slow down"));
        assert!(!is_long_context_error("long context"));
    }
}
