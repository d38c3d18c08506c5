//! Run-scoped product log shared by all workers.
//!
//! # Separation of Concerns
//!
//! - **Run log (this module)**: START/END/ERROR lines for every work item,
//!   mirrored to the console and to `task-<unix-seconds>.log`. Always written,
//!   unaffected by `RUST_LOG`.
//!
//! - **Tracing (`logging`)**: dev diagnostics on stderr, filtered by `RUST_LOG`.

use std::fmt::Display;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::warn;

type Sink = Box<dyn Write + Send>;

/// Lock-guarded fan-out writer. Each `println` call emits one whole line to
/// every sink before any other caller can write.
pub struct RunLog {
    sinks: Mutex<Vec<Sink>>,
    path: Option<PathBuf>,
}

impl RunLog {
    /// Console plus an append-only `task-<unix-seconds>.log` inside `dir`.
    pub fn open(dir: &Path, started: DateTime<Utc>) -> Result<Self> {
        let path = dir.join(log_file_name(started));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open run log {}", path.display()))?;
        Ok(Self {
            sinks: Mutex::new(vec![Box::new(io::stdout()), Box::new(file)]),
            path: Some(path),
        })
    }

    /// Arbitrary sinks, e.g. in-memory buffers in tests.
    pub fn with_writers(sinks: Vec<Sink>) -> Self {
        Self {
            sinks: Mutex::new(sinks),
            path: None,
        }
    }

    /// Log file path when backed by a file.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write one line to every sink. Never fails: a sink error is reported
    /// through tracing and the remaining sinks are still written.
    pub fn println(&self, line: impl Display) {
        let mut buf = line.to_string();
        buf.push('\n');
        // Poisoned by a panicking caller; the sinks themselves are still usable.
        let mut sinks = self.sinks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for sink in &mut *sinks {
            if let Err(err) = sink.write_all(buf.as_bytes()).and_then(|()| sink.flush()) {
                warn!(err = %err, "failed to write run log line");
            }
        }
    }
}

pub fn log_file_name(started: DateTime<Utc>) -> String {
    format!("task-{}.log", started.timestamp())
}
