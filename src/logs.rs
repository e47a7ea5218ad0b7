// src/logs.rs
//
// =============================================================================
// FLOWCALC: WORKSPACE LOGGER (v 0.3 )
// =============================================================================
//
// A `log::Log` that forwards everything to env_logger and, while a job is
// running, also tees this crate's records into the job's `debug.log`.
//
// It decouples log generation (Worker/Engine) from where the lines end up
// (terminal vs. the calculation workspace).

use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

// ============================================================================
// 1. THE SINK (State)
// ============================================================================

/// Handle to the per-job log file. Cloned into the logger and the worker.
#[derive(Clone, Default)]
pub struct JobLogSink {
    file: Arc<Mutex<Option<File>>>,
}

impl JobLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts appending to `path`, replacing any previously attached file.
    pub fn attach(&self, path: &Path) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if let Ok(mut slot) = self.file.lock() {
            *slot = Some(file);
        }
        Ok(())
    }

    pub fn detach(&self) {
        if let Ok(mut slot) = self.file.lock() {
            if let Some(mut file) = slot.take() {
                file.flush().ok();
            }
        }
    }

    pub fn is_attached(&self) -> bool {
        self.file.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Appends one line. Write errors are dropped; logging must not fail a job.
    pub fn write_line(&self, line: &str) {
        if let Ok(mut slot) = self.file.lock() {
            if let Some(file) = slot.as_mut() {
                writeln!(file, "{}", line).ok();
            }
        }
    }
}

// ============================================================================
// 2. THE LOGGER (Integration)
// ============================================================================

pub struct WorkspaceLogger {
    inner: env_logger::Logger,
    sink: JobLogSink,
}

impl WorkspaceLogger {
    /// Installs the global logger. `RUST_LOG` drives the terminal output
    /// (default `info`); the job file always receives debug and above.
    pub fn init(sink: JobLogSink) -> Result<(), SetLoggerError> {
        let inner =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .build();
        let max_level = inner.filter().max(LevelFilter::Debug);

        let logger = Box::new(WorkspaceLogger { inner, sink });
        // Leak the box to create a static reference required by the 'log' crate singleton
        log::set_logger(Box::leak(logger)).map(|()| log::set_max_level(max_level))
    }

    fn is_own(target: &str) -> bool {
        target == "flowcalc" || target.starts_with("flowcalc::")
    }
}

impl Log for WorkspaceLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
            || (Self::is_own(metadata.target()) && metadata.level() <= LevelFilter::Debug)
    }

    fn log(&self, record: &Record) {
        if self.inner.matches(record) {
            self.inner.log(record);
        }

        if Self::is_own(record.target()) && record.level() <= LevelFilter::Debug {
            // "flowcalc::scheduler" -> "scheduler"
            let target_full = record.target();
            let target = target_full.split("::").last().unwrap_or(target_full);
            self.sink.write_line(&format!(
                "{} {:<5} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                target,
                record.args()
            ));
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}
