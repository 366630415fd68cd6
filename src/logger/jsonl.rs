//! Append-only JSONL decision log for the control loop.
//!
//! One self-contained JSON object per line, assembled in memory and written
//! with a single `write_all` so a tailing process never sees a torn line.
//! Only the control thread writes; the data path never logs.
//!
//! Degradation chain: primary file, then stderr with a `[QOS-JSONL]`
//! prefix, then silent discard. The engine must never fail because its log
//! file did.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{QosError, Result};

/// Severity of a logged decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Decision classes the engine records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    EngineStart,
    EngineStop,
    WrrWeightApplied,
    VolumeThrottlePushed,
    MinGuaranteeUnenforced,
    GcPressureChange,
    Error,
}

/// A single JSONL decision record. Context fields are optional; `None`
/// fields are omitted from the output line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u32>,
    /// Backend event name for WRR decisions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_event: Option<String>,
    /// Directive that produced a WRR decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directive: Option<String>,
    /// Weight after clamping, as pushed to the scheduler.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
    /// Throttle limit pushed, per metric.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bw_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iops_limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// New entry stamped with the current UTC time.
    #[must_use]
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event,
            severity,
            array: None,
            volume: None,
            backend_event: None,
            directive: None,
            weight: None,
            bw_limit: None,
            iops_limit: None,
            error_code: None,
            details: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Normal,
    Stderr,
    Discard,
}

/// Size at which the current file is renamed to `<path>.old` and restarted.
const ROTATE_AT_BYTES: u64 = 64 * 1024 * 1024;

/// Append-only JSONL writer with single-file rotation and stderr fallback.
pub struct JsonlWriter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    bytes_written: u64,
}

impl std::fmt::Debug for JsonlWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlWriter")
            .field("path", &self.path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl JsonlWriter {
    /// Open the log file for appending, degrading to stderr on failure.
    #[must_use]
    pub fn open(path: PathBuf) -> Self {
        let (writer, state, bytes_written) = match open_append(&path) {
            Ok((file, size)) => (
                Some(BufWriter::with_capacity(16 * 1024, file)),
                WriterState::Normal,
                size,
            ),
            Err(err) => {
                let _ = writeln!(
                    io::stderr(),
                    "[QOS-JSONL] cannot open {}: {err}; logging to stderr",
                    path.display()
                );
                (None, WriterState::Stderr, 0)
            }
        };
        Self {
            path,
            writer,
            state,
            bytes_written,
        }
    }

    /// Serialize and append one entry as a single line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(json) => format!("{json}\n"),
            Err(err) => {
                let _ = writeln!(io::stderr(), "[QOS-JSONL] serialize error: {err}");
                return;
            }
        };
        self.write_line(&line);
    }

    /// Flush buffered lines to the file.
    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }

    /// Current degradation state label.
    #[must_use]
    pub fn state(&self) -> &'static str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    fn write_line(&mut self, line: &str) {
        if self.state == WriterState::Normal
            && self.bytes_written + line.len() as u64 > ROTATE_AT_BYTES
        {
            self.rotate();
        }
        match self.state {
            WriterState::Normal => {
                let Some(writer) = self.writer.as_mut() else {
                    self.degrade();
                    self.write_line(line);
                    return;
                };
                if writer.write_all(line.as_bytes()).is_err() {
                    self.degrade();
                    self.write_line(line);
                    return;
                }
                self.bytes_written += line.len() as u64;
            }
            WriterState::Stderr => {
                let _ = write!(io::stderr(), "[QOS-JSONL] {line}");
            }
            WriterState::Discard => {}
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        self.state = match self.state {
            WriterState::Normal => WriterState::Stderr,
            _ => WriterState::Discard,
        };
    }

    /// Rename the full file to `<path>.old` and start fresh; the previous
    /// `.old` is dropped.
    fn rotate(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
        self.writer = None;

        let mut old = self.path.as_os_str().to_owned();
        old.push(".old");
        let _ = fs::rename(&self.path, PathBuf::from(old));

        match open_append(&self.path) {
            Ok((file, size)) => {
                self.writer = Some(BufWriter::with_capacity(16 * 1024, file));
                self.bytes_written = size;
            }
            Err(_) => self.degrade(),
        }
    }
}

fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| QosError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| QosError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}
