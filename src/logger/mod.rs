//! Structured decision logging for the control loop.

pub mod jsonl;

use std::path::PathBuf;

pub use jsonl::{EventType, JsonlWriter, LogEntry, Severity};

use crate::core::config::LogConfig;

/// Optional decision log; a disabled config yields a no-op sink.
#[derive(Debug)]
pub struct DecisionLog {
    writer: Option<JsonlWriter>,
}

impl DecisionLog {
    /// Build from config; disabled or pathless configs log nothing.
    #[must_use]
    pub fn from_config(config: &LogConfig) -> Self {
        let writer = if config.enabled {
            config.jsonl_path.clone().map(JsonlWriter::open)
        } else {
            None
        };
        Self { writer }
    }

    /// Explicit sink for tests.
    #[must_use]
    pub fn to_path(path: PathBuf) -> Self {
        Self {
            writer: Some(JsonlWriter::open(path)),
        }
    }

    /// A log that drops everything.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { writer: None }
    }

    /// Record one decision.
    pub fn write(&mut self, entry: &LogEntry) {
        if let Some(writer) = self.writer.as_mut() {
            writer.write_entry(entry);
        }
    }

    /// Flush pending lines.
    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_log_drops_entries() {
        let mut log = DecisionLog::disabled();
        log.write(&LogEntry::new(EventType::EngineStart, Severity::Info));
        log.flush();
    }

    #[test]
    fn config_with_path_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.jsonl");
        let config = LogConfig {
            enabled: true,
            jsonl_path: Some(path.clone()),
        };
        let mut log = DecisionLog::from_config(&config);
        log.write(&LogEntry::new(EventType::EngineStart, Severity::Info));
        log.flush();
        assert!(std::fs::read_to_string(&path).unwrap().contains("engine_start"));
    }
}
