//! Shared identifier types, backend event taxonomy, and WRR weight presets.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

// ──────────────────── identifiers ────────────────────

/// Index of a polling lane (reactor). Lanes are dense integers assigned at
/// startup; the lane count is fixed for the life of the engine.
pub type LaneId = u32;

/// Volume index within one array. Bounded by `max_volume_count`.
pub type VolumeId = u32;

/// Storage array index. Bounded by `array_count`.
pub type ArrayId = u32;

/// NVMe subsystem identifier (NQN id). Opaque key mapping to attached volumes.
pub type NqnId = u32;

// ──────────────────── foreground I/O ────────────────────

/// A front-end I/O as seen by the admission path. Opaque beyond the fields
/// the budget arithmetic needs; the submission adapter receives it whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeIo {
    /// Target volume within the owning array.
    pub volume_id: VolumeId,
    /// Transfer length in bytes; charged against the bandwidth budget.
    pub length: u64,
    /// Caller-chosen tag carried through untouched (completion routing).
    pub tag: u64,
}

impl VolumeIo {
    #[must_use]
    pub const fn new(volume_id: VolumeId, length: u64, tag: u64) -> Self {
        Self {
            volume_id,
            length,
            tag,
        }
    }
}

// ──────────────────── throttle metric ────────────────────

/// Which of the two token budgets an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleMetric {
    Bandwidth,
    Iops,
}

impl fmt::Display for ThrottleMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bandwidth => write!(f, "bandwidth"),
            Self::Iops => write!(f, "iops"),
        }
    }
}

// ──────────────────── backend events ────────────────────

/// Backend event types whose processing weight the correction loop re-tunes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendEvent {
    Flush,
    GarbageCollection,
    UserdataRebuild,
    MetadataRebuild,
    MetaIo,
    FrontendIo,
}

impl BackendEvent {
    /// All event types, in directive-store order.
    pub const ALL: [Self; 6] = [
        Self::Flush,
        Self::GarbageCollection,
        Self::UserdataRebuild,
        Self::MetadataRebuild,
        Self::MetaIo,
        Self::FrontendIo,
    ];

    /// Dense index for flat per-event arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Flush => 0,
            Self::GarbageCollection => 1,
            Self::UserdataRebuild => 2,
            Self::MetadataRebuild => 3,
            Self::MetaIo => 4,
            Self::FrontendIo => 5,
        }
    }

    /// Number of event types.
    pub const COUNT: usize = Self::ALL.len();
}

impl fmt::Display for BackendEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Flush => "flush",
            Self::GarbageCollection => "gc",
            Self::UserdataRebuild => "rebuild",
            Self::MetadataRebuild => "meta_rebuild",
            Self::MetaIo => "metaio",
            Self::FrontendIo => "fe_io",
        };
        write!(f, "{name}")
    }
}

// ──────────────────── rebuild impact ────────────────────

/// User-configured rebuild-impact priority for one array. Maps directly onto
/// a WRR priority preset for the rebuild event pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildImpact {
    Highest,
    Higher,
    High,
    Medium,
    Low,
    Lower,
    Lowest,
}

impl Default for RebuildImpact {
    fn default() -> Self {
        Self::Highest
    }
}

// ──────────────────── GC pressure ────────────────────

/// Free-segment pressure classification reported by the resource source.
/// Ordering matters: higher variants mean scarcer free segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcPressure {
    Normal,
    Medium,
    High,
    Critical,
}

impl Default for GcPressure {
    fn default() -> Self {
        Self::Normal
    }
}

// ──────────────────── weight presets ────────────────────

/// Fixed WRR weight presets for absolute priority directives. Lower weight
/// means the event is serviced more often.
pub mod preset {
    pub const PRIO_WT_HIGHEST: i32 = -1000;
    pub const PRIO_WT_HIGHER: i32 = -400;
    pub const PRIO_WT_HIGH: i32 = -200;
    pub const PRIO_WT_MEDIUM: i32 = -100;
    pub const PRIO_WT_LOW: i32 = -20;
    pub const PRIO_WT_LOWER: i32 = -4;
    pub const PRIO_WT_LOWEST: i32 = 0;
}
