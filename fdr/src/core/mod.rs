//! Deterministic, pure logic shared by the fix loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod check_log;
pub mod compaction;
pub mod context;
pub mod exclude;
pub mod lang;
pub mod messages;
pub mod oscillation;
pub mod ruff_policy;
pub mod scope;
pub mod signatures;
pub mod threads;
pub mod types;
pub mod verdict;
