//! Stable exit codes for the `fix-die-repeat` binary.

/// Checks pass and review found nothing (or the model test passed).
pub const OK: i32 = 0;
/// Configuration error, exhausted budget, or any other fatal failure.
pub const FAILURE: i32 = 1;
/// A blocking step was interrupted with SIGINT.
pub const INTERRUPTED: i32 = 130;
