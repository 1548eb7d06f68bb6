//! Interface event log
//!
//! Append-only record of what the session did, shown to the operator.
//! Every entry is broadcast to subscribers and mirrored to `tracing`.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Who produced a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogSource {
    System,
    User,
    Agent,
    Tool,
    Standby,
    Script,
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::System => "SYSTEM",
            Self::User => "USER",
            Self::Agent => "AGENT",
            Self::Tool => "TOOL",
            Self::Standby => "STANDBY",
            Self::Script => "SCRIPT",
        };
        f.pad(name)
    }
}

/// Entry severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// One interface log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: LogSource,
    pub message: String,
    pub severity: Severity,
}

/// Shared append-only log
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
    tx: broadcast::Sender<LogEntry>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            tx,
        }
    }

    /// Append an entry
    pub fn append(&self, source: LogSource, message: impl Into<String>, severity: Severity) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            source,
            message: message.into(),
            severity,
        };

        match severity {
            Severity::Info | Severity::Success => {
                tracing::info!(source = %entry.source, "{}", entry.message);
            }
            Severity::Warning => tracing::warn!(source = %entry.source, "{}", entry.message),
            Severity::Error => tracing::error!(source = %entry.source, "{}", entry.message),
        }

        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry.clone());
        }
        let _ = self.tx.send(entry);
    }

    pub fn info(&self, source: LogSource, message: impl Into<String>) {
        self.append(source, message, Severity::Info);
    }

    pub fn success(&self, source: LogSource, message: impl Into<String>) {
        self.append(source, message, Severity::Success);
    }

    pub fn warning(&self, source: LogSource, message: impl Into<String>) {
        self.append(source, message, Severity::Warning);
    }

    pub fn error(&self, source: LogSource, message: impl Into<String>) {
        self.append(source, message, Severity::Error);
    }

    /// Snapshot of all entries so far
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Whether any entry from `source` contains `needle`
    #[must_use]
    pub fn contains(&self, source: LogSource, needle: &str) -> bool {
        self.entries
            .lock()
            .map(|e| {
                e.iter()
                    .any(|entry| entry.source == source && entry.message.contains(needle))
            })
            .unwrap_or(false)
    }

    /// Observe entries as they are appended
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_kept_in_order() {
        let log = EventLog::new();
        log.info(LogSource::System, "first");
        log.error(LogSource::Tool, "second");

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].severity, Severity::Error);
        assert!(entries[0].timestamp <= entries[1].timestamp);
        assert!(log.contains(LogSource::Tool, "sec"));
        assert!(!log.contains(LogSource::System, "sec"));
    }

    #[tokio::test]
    async fn subscribers_see_new_entries() {
        let log = EventLog::new();
        let mut rx = log.subscribe();
        log.warning(LogSource::Standby, "Ignored: hello");

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.source, LogSource::Standby);
        assert_eq!(entry.severity, Severity::Warning);
    }
}
