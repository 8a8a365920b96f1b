//! Tracing subscriber for a run.
//!
//! Three sinks share one filter:
//! - stderr, compact, for the operator;
//! - `.fix-die-repeat/fdr.log`, appended across runs;
//! - the session log, truncated at the start of every run.
//!
//! `RUST_LOG` overrides the default level (`info`, or `debug` in debug mode).

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init(debug: bool, fdr_log: &Path, session_log: &Path) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let persistent = open_log(fdr_log, true)?;
    let session = open_log(session_log, false)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .with(
            fmt::layer()
                .with_writer(Mutex::new(persistent))
                .with_ansi(false),
        )
        .with(
            fmt::layer()
                .with_writer(Mutex::new(session))
                .with_ansi(false),
        )
        .try_init()
        .context("install tracing subscriber")
}

fn open_log(path: &Path, append: bool) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    options
        .open(path)
        .with_context(|| format!("open log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_log_is_truncated_and_persistent_log_appended() {
        let dir = tempfile::tempdir().expect("tempdir");
        let persistent = dir.path().join("fdr.log");
        let session = dir.path().join("session.log");
        fs::write(&persistent, "earlier run\n").expect("write");
        fs::write(&session, "earlier session\n").expect("write");

        drop(open_log(&persistent, true).expect("open"));
        drop(open_log(&session, false).expect("open"));

        assert_eq!(fs::read_to_string(&persistent).expect("read"), "earlier run\n");
        assert_eq!(fs::read_to_string(&session).expect("read"), "");
    }
}
