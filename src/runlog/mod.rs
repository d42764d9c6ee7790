//! Run log — the engine's event pipeline.
//!
//! Every step, REPL block, sub-call, and model invocation reports through a
//! single `RunLog` handle that fans entries out to its sinks (stdout for the
//! CLI path, memory for tests).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity levels for run log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// A structured log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Source component (e.g. "controller", "repl", "llm").
    pub source: String,
    /// Run ID when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            source: source.into(),
            run_id: None,
            message: message.into(),
        }
    }

    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Format as a single-line log string.
    pub fn format_line(&self) -> String {
        let ts = self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ");
        let run = self
            .run_id
            .as_deref()
            .map(|r| format!(" [{r}]"))
            .unwrap_or_default();
        format!("{ts} {} {}{} {}", self.level, self.source, run, self.message)
    }
}

/// Trait for log output sinks.
pub trait LogSink: Send + Sync {
    fn write(&self, entry: &LogEntry);

    fn flush(&self) {}
}

/// Fan-out handle dispatching entries to every attached sink.
///
/// Cheap to clone; clones share the same sinks.
#[derive(Clone)]
pub struct RunLog {
    sinks: Vec<Arc<dyn LogSink>>,
    min_level: LogLevel,
}

impl RunLog {
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            min_level: LogLevel::Debug,
        }
    }

    /// A log that prints formatted lines to stdout.
    pub fn stdout() -> Self {
        let mut log = Self::new();
        log.add_sink(Arc::new(StdoutSink));
        log
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn LogSink>) {
        self.sinks.push(sink);
    }

    pub fn log(&self, entry: &LogEntry) {
        if entry.level < self.min_level {
            return;
        }
        for sink in &self.sinks {
            sink.write(entry);
        }
    }

    pub fn debug(&self, source: &str, message: impl AsRef<str>) {
        self.log(&LogEntry::new(LogLevel::Debug, source, message.as_ref()));
    }

    pub fn info(&self, source: &str, message: impl AsRef<str>) {
        self.log(&LogEntry::new(LogLevel::Info, source, message.as_ref()));
    }

    pub fn warn(&self, source: &str, message: impl AsRef<str>) {
        self.log(&LogEntry::new(LogLevel::Warn, source, message.as_ref()));
    }

    pub fn error(&self, source: &str, message: impl AsRef<str>) {
        self.log(&LogEntry::new(LogLevel::Error, source, message.as_ref()));
    }

    pub fn flush(&self) {
        for sink in &self.sinks {
            sink.flush();
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Built-in Sinks ─────────────────────────────────────────────────────────

/// Sink that writes formatted lines to stdout.
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn write(&self, entry: &LogEntry) {
        println!("{}", entry.format_line());
    }
}

/// Sink that collects entries in memory (testing / inspection).
pub struct MemorySink {
    entries: std::sync::Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            entries: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// All messages, joined — convenient for substring assertions.
    pub fn rendered(&self) -> String {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.message.clone())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for MemorySink {
    fn write(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_order() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn format_line_includes_parts() {
        let entry = LogEntry::new(LogLevel::Info, "controller", "step 1").with_run("r-42");
        let line = entry.format_line();
        assert!(line.contains("INFO"));
        assert!(line.contains("controller"));
        assert!(line.contains("[r-42]"));
        assert!(line.contains("step 1"));
    }

    #[test]
    fn memory_sink_collects() {
        let sink = Arc::new(MemorySink::new());
        let mut log = RunLog::new();
        log.add_sink(sink.clone());

        log.info("repl", "block 1 ok");
        log.error("llm", "exit code 1");

        assert_eq!(sink.len(), 2);
        assert!(sink.rendered().contains("block 1 ok"));
    }

    #[test]
    fn min_level_filters() {
        let sink = Arc::new(MemorySink::new());
        let mut log = RunLog::new().with_level(LogLevel::Warn);
        log.add_sink(sink.clone());

        log.debug("x", "dropped");
        log.info("x", "dropped");
        log.warn("x", "kept");

        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn clones_share_sinks() {
        let sink = Arc::new(MemorySink::new());
        let mut log = RunLog::new();
        log.add_sink(sink.clone());

        let clone = log.clone();
        clone.info("x", "via clone");
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn entry_serializes_without_empty_run_id() {
        let entry = LogEntry::new(LogLevel::Info, "s", "m");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("run_id"));
    }
}
