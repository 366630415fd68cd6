//! Measured parameters for the current monitoring cycle: per-volume
//! bandwidth/IOPS aggregated across lanes, and per-backend-event bandwidth.
//!
//! Written by Monitoring, read by Policy and Correction, cleared each cycle.

#![allow(missing_docs)]

use std::collections::HashMap;

use crate::context::VolumeKey;
use crate::core::types::{BackendEvent, LaneId};

// ──────────────────── per-lane slice ────────────────────

/// One lane's contribution to a volume's measured load this cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneParameter {
    pub bandwidth: u64,
    pub iops: u64,
}

impl LaneParameter {
    pub fn accumulate(&mut self, bandwidth: u64, iops: u64) {
        self.bandwidth += bandwidth;
        self.iops += iops;
    }
}

// ──────────────────── per-volume aggregate ────────────────────

/// A volume's measured load: lane breakdown plus the cross-lane sum.
#[derive(Debug, Clone, Default)]
pub struct VolumeParameter {
    lanes: HashMap<LaneId, LaneParameter>,
    total_bandwidth: u64,
    total_iops: u64,
}

impl VolumeParameter {
    pub fn accumulate_lane(&mut self, lane: LaneId, bandwidth: u64, iops: u64) {
        self.lanes.entry(lane).or_default().accumulate(bandwidth, iops);
    }

    /// Fold every lane slice into the aggregate totals. Called once per cycle
    /// after all lanes have reported.
    pub fn sum_lanes(&mut self) {
        self.total_bandwidth = self.lanes.values().map(|l| l.bandwidth).sum();
        self.total_iops = self.lanes.values().map(|l| l.iops).sum();
    }

    #[must_use]
    pub fn lane(&self, lane: LaneId) -> Option<&LaneParameter> {
        self.lanes.get(&lane)
    }

    #[must_use]
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Aggregate bandwidth this cycle (bytes per time slice).
    #[must_use]
    pub const fn bandwidth(&self) -> u64 {
        self.total_bandwidth
    }

    /// Aggregate IOPS this cycle (I/Os per time slice).
    #[must_use]
    pub const fn iops(&self) -> u64 {
        self.total_iops
    }
}

// ──────────────────── collections ────────────────────

/// Measured state for every active volume and backend event this cycle.
#[derive(Debug, Clone, Default)]
pub struct QosParameters {
    volumes: HashMap<VolumeKey, VolumeParameter>,
    event_bandwidth: [u64; BackendEvent::COUNT],
}

impl QosParameters {
    pub fn reset(&mut self) {
        self.volumes.clear();
        self.event_bandwidth = [0; BackendEvent::COUNT];
    }

    pub fn volume_mut(&mut self, key: VolumeKey) -> &mut VolumeParameter {
        self.volumes.entry(key).or_default()
    }

    #[must_use]
    pub fn volume(&self, key: VolumeKey) -> Option<&VolumeParameter> {
        self.volumes.get(&key)
    }

    #[must_use]
    pub fn volume_exists(&self, key: VolumeKey) -> bool {
        self.volumes.contains_key(&key)
    }

    pub fn sum_all_lanes(&mut self) {
        for param in self.volumes.values_mut() {
            param.sum_lanes();
        }
    }

    pub fn add_event_bandwidth(&mut self, event: BackendEvent, bandwidth: u64) {
        self.event_bandwidth[event.index()] += bandwidth;
    }

    #[must_use]
    pub const fn event_bandwidth(&self, event: BackendEvent) -> u64 {
        self.event_bandwidth[event.index()]
    }
}
