//! I/O adapters used by the fix loop.

pub mod agent;
pub mod artifacts;
pub mod changes;
pub mod config;
pub mod detect;
pub mod git;
pub mod github;
pub mod global_log;
pub mod notify;
pub mod paths;
pub mod process;
pub mod prompt;
