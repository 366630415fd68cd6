//! QOS-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::PathBuf;

use thiserror::Error;

/// Shared `Result` alias for the engine.
pub type Result<T> = std::result::Result<T, QosError>;

/// Top-level error type for the QoS engine.
///
/// Steady-state operation never produces errors: a throttled I/O is queued,
/// never rejected. Errors cover configuration faults, lifecycle-handoff
/// failures, and programmer-error preconditions (out-of-range ids).
#[derive(Debug, Error)]
pub enum QosError {
    #[error("[QOS-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[QOS-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[QOS-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[QOS-2001] volume id {volume_id} out of range (max {max})")]
    VolumeOutOfRange { volume_id: u32, max: u32 },

    #[error("[QOS-2002] lane id {lane} out of range (max {max})")]
    LaneOutOfRange { lane: u32, max: u32 },

    #[error("[QOS-2003] array id {array_id} out of range (max {max})")]
    ArrayOutOfRange { array_id: u32, max: u32 },

    #[error("[QOS-3001] lifecycle {operation} for volume {volume_id} timed out after {timeout_ms}ms")]
    LifecycleTimeout {
        operation: &'static str,
        volume_id: u32,
        timeout_ms: u64,
    },

    #[error("[QOS-3002] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[QOS-3101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[QOS-3102] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[QOS-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl QosError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "QOS-1001",
            Self::MissingConfig { .. } => "QOS-1002",
            Self::ConfigParse { .. } => "QOS-1003",
            Self::VolumeOutOfRange { .. } => "QOS-2001",
            Self::LaneOutOfRange { .. } => "QOS-2002",
            Self::ArrayOutOfRange { .. } => "QOS-2003",
            Self::LifecycleTimeout { .. } => "QOS-3001",
            Self::ChannelClosed { .. } => "QOS-3002",
            Self::Serialization { .. } => "QOS-3101",
            Self::Io { .. } => "QOS-3102",
            Self::Runtime { .. } => "QOS-3900",
        }
    }

    /// Whether retrying might resolve the failure. Out-of-range ids are
    /// precondition violations and never retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LifecycleTimeout { .. }
                | Self::ChannelClosed { .. }
                | Self::Io { .. }
                | Self::Runtime { .. }
        )
    }
}

impl From<serde_json::Error> for QosError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for QosError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
