//! Tracing bootstrap for Dragnet binaries, plus the structured log-entry
//! record shared with the worker log stream.
//!
//! `dragnetd` and `dragnet-worker` both call [`init_tracing`] once at
//! start-up; repeat calls (tests, embedded use) are no-ops because the
//! global subscriber installs at most once per process.

use std::io::IsTerminal;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber on stderr.
///
/// `RUST_LOG` takes precedence when set. The fallback filter runs the
/// binary at `default_level` but holds the HTTP and Redis internals at
/// `warn`, which otherwise drown scan progress lines at debug verbosity.
/// With `json` set, lines come out as newline-delimited JSON with event
/// fields flattened for log pipelines.
pub fn init_tracing(json: bool, default_level: Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},hyper=warn,reqwest=warn,redis=warn",
            default_level.as_str().to_lowercase()
        ))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal());

    let installed = if json {
        builder.json().flatten_event(true).try_init()
    } else {
        builder.try_init()
    };
    installed.ok();
}

/// One entry on the shared `worker:logs` stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerLogEntry {
    /// `YYYY-MM-DD HH:MM:SS`, matching what the log consumers expect.
    pub timestamp: String,
    /// `INFO` / `WARN` / `ERROR`.
    pub level: String,
    pub worker_name: String,
    pub message: String,
}

impl WorkerLogEntry {
    pub fn new(
        level: impl Into<String>,
        worker_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        WorkerLogEntry {
            timestamp: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            level: level.into(),
            worker_name: worker_name.into(),
            message: message.into(),
        }
    }

    pub fn info(worker_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new("INFO", worker_name, message)
    }

    pub fn warn(worker_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new("WARN", worker_name, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_uses_wire_keys() {
        let entry = WorkerLogEntry::info("w-a", "claimed task t1");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"workerName\":\"w-a\""));
        assert!(json.contains("\"level\":\"INFO\""));
    }
}
