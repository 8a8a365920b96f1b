//! Check, fix, review, repeat.
//!
//! The crate drives an external coding agent against a project's check
//! command until the checks pass and an automated review reports nothing
//! left to fix. The architecture keeps the same split throughout:
//!
//! - **[`core`]**: Pure, deterministic logic (compaction planning, log
//!   filtering, verdicts, thread ordering). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (processes, git, the agent, the
//!   artifact store, the hosting CLI). Each sits behind a trait or a thin
//!   struct so loops can be driven by fakes in tests.
//!
//! Orchestration modules ([`fix`], [`review`], [`review_fix`], [`pr`],
//! [`introspection`], [`looping`]) coordinate the two to implement a run.

pub mod core;
pub mod exit_codes;
pub mod fix;
pub mod introspection;
pub mod io;
pub mod logging;
pub mod looping;
pub mod pr;
pub mod preflight;
pub mod review;
pub mod review_fix;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
