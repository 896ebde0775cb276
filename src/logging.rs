//! # Logger Sink Capability
//!
//! The engine never owns a logging backend directly (spec §6, §9): it logs
//! through the `Log` trait, injected by whoever constructs an
//! `Orchestrator`. This keeps the core free of a process-wide mutable
//! singleton logger, the same discipline the teacher repo applies to its
//! `ProgressReporter` (constructed and threaded through `Context`, never a
//! `::get_instance()`).
//!
//! The default implementation, `TracingLog`, emits one `tracing` event per
//! call — grounded on the logging stacks used elsewhere in the example
//! pack (`sanjay920-agentsh`, `redlittenyoth-cortex`,
//! `web3infra-foundation-git-internal`), none of which this teacher repo
//! pulls in itself. `RecordingLog` is the in-memory test double used by
//! unit tests that need to assert on emitted events.

use std::collections::HashMap;
use std::sync::Mutex;

/// Severity of a single log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Fine-grained diagnostic detail (backend call start/end, cache hits).
    Debug,
    /// Notable lifecycle events (version detection).
    Info,
    /// Recoverable anomalies (parser fallback to a less specific adapter).
    Warn,
    /// A command execution materialized as a failure.
    Error,
    /// Unrecoverable engine-level fault.
    Critical,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

/// A structured key/value bag attached to a log event.
pub type Fields = HashMap<String, String>;

/// Logger sink capability consumed by the orchestrator and backends.
///
/// Implementations must be `Send + Sync`: the engine may call `log` from
/// any backend task.
pub trait Log: Send + Sync {
    /// Emit one structured log event.
    fn log(&self, level: LogLevel, message: &str, fields: Fields);
}

/// Convenience helper: build a one-entry field map.
pub fn field(key: &str, value: impl ToString) -> Fields {
    let mut fields = Fields::new();
    fields.insert(key.to_string(), value.to_string());
    fields
}

/// Default `Log` implementation: forwards every call to a `tracing` event
/// at the matching level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl Log for TracingLog {
    fn log(&self, level: LogLevel, message: &str, fields: Fields) {
        let fields_str = render_fields(&fields);
        match level {
            LogLevel::Debug => tracing::debug!(fields = %fields_str, "{}", message),
            LogLevel::Info => tracing::info!(fields = %fields_str, "{}", message),
            LogLevel::Warn => tracing::warn!(fields = %fields_str, "{}", message),
            LogLevel::Error => tracing::error!(fields = %fields_str, "{}", message),
            LogLevel::Critical => tracing::error!(fields = %fields_str, critical = true, "{}", message),
        }
    }
}

fn render_fields(fields: &Fields) -> String {
    let mut pairs: Vec<String> = fields.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    pairs.join(" ")
}

/// Initialize the global `tracing` subscriber from `MANCER_LOG_LEVEL` (or
/// the supplied default). Intended to be called once from `main`.
pub fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_env("MANCER_LOG_LEVEL")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level.to_string()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// One captured event, as seen by `RecordingLog`.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Severity the event was logged at.
    pub level: LogLevel,
    /// Rendered message.
    pub message: String,
    /// Structured fields attached to the event.
    pub fields: Fields,
}

/// Test double that records every `log` call for later assertions.
#[derive(Default)]
pub struct RecordingLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl RecordingLog {
    /// Construct an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event recorded so far, in call order.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().expect("log recorder mutex poisoned").clone()
    }

    /// Number of events recorded at or above `level`.
    pub fn count_at_least(&self, level: LogLevel) -> usize {
        self.entries()
            .into_iter()
            .filter(|e| e.level >= level)
            .count()
    }
}

impl Log for RecordingLog {
    fn log(&self, level: LogLevel, message: &str, fields: Fields) {
        self.entries
            .lock()
            .expect("log recorder mutex poisoned")
            .push(LogEntry {
                level,
                message: message.to_string(),
                fields,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_log_captures_events() {
        let log = RecordingLog::new();
        log.log(LogLevel::Debug, "backend start", field("tool", "echo"));
        log.log(LogLevel::Error, "command failed", Fields::new());

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, LogLevel::Debug);
        assert_eq!(entries[1].message, "command failed");
    }

    #[test]
    fn test_count_at_least() {
        let log = RecordingLog::new();
        log.log(LogLevel::Debug, "a", Fields::new());
        log.log(LogLevel::Warn, "b", Fields::new());
        log.log(LogLevel::Error, "c", Fields::new());

        assert_eq!(log.count_at_least(LogLevel::Warn), 2);
        assert_eq!(log.count_at_least(LogLevel::Critical), 0);
    }

    #[test]
    fn test_level_str() {
        assert_eq!(LogLevel::Debug.as_str(), "debug");
        assert_eq!(LogLevel::Critical.as_str(), "critical");
    }
}
