//! The shared mutable state blob at the heart of the control loop.
//!
//! `QosContext` is owned by the engine and lent `&mut` to whichever internal
//! manager executes this tick; exactly one manager mutates it at a time. The
//! only cross-thread pieces are the lane-processed barrier (pollers on every
//! lane report in) and that lives behind an `Arc` of atomics.

pub mod correction;
pub mod parameters;
pub mod resource;
pub mod user_policy;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::config::QosConfig;
use crate::core::types::{ArrayId, GcPressure, LaneId, VolumeId};

pub use correction::QosCorrection;
pub use parameters::QosParameters;
pub use resource::QosResource;
pub use user_policy::QosUserPolicy;

// ──────────────────── volume key ────────────────────

/// Globally unique volume coordinate across arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeKey {
    /// Owning array.
    pub array: ArrayId,
    /// Volume index within the array.
    pub volume: VolumeId,
}

impl VolumeKey {
    /// Build a key from its parts.
    #[must_use]
    pub const fn new(array: ArrayId, volume: VolumeId) -> Self {
        Self { array, volume }
    }
}

// ──────────────────── lane barrier ────────────────────

/// Cross-lane barrier: each poller marks its lane processed once per cycle;
/// the control loop polls `all_processed` before trusting the cycle's
/// aggregated counters. Polled, never waited on.
#[derive(Debug)]
pub struct ReactorBarrier {
    processed: Vec<AtomicBool>,
}

impl ReactorBarrier {
    /// Barrier over `lane_count` dense lane ids.
    #[must_use]
    pub fn new(lane_count: u32) -> Self {
        Self {
            processed: (0..lane_count).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Mark one lane's per-cycle contribution complete. Out-of-range lanes
    /// are ignored (the poller validated the id at registration).
    pub fn set_processed(&self, lane: LaneId) {
        if let Some(flag) = self.processed.get(lane as usize) {
            flag.store(true, Ordering::Release);
        }
    }

    /// Whether every lane has reported since the last reset.
    #[must_use]
    pub fn all_processed(&self) -> bool {
        self.processed
            .iter()
            .all(|flag| flag.load(Ordering::Acquire))
    }

    /// Re-arm the barrier for the next cycle.
    pub fn reset(&self) {
        for flag in &self.processed {
            flag.store(false, Ordering::Release);
        }
    }

    /// Number of lanes the barrier tracks.
    #[must_use]
    pub fn lane_count(&self) -> usize {
        self.processed.len()
    }
}

// ──────────────────── policy snapshot ────────────────────

/// Last-cycle observations the Policy evaluators diff against. Lives in the
/// context because the internal managers are rebuilt on every transition and
/// carry no state of their own.
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    /// Whether a minimum guarantee was in effect last cycle.
    pub min_policy_in_effect: bool,
    /// The minimum-guarantee volume last cycle, if any.
    pub minimum_guarantee_volume: Option<VolumeKey>,
    /// The (lane, volume) pairs active last cycle.
    pub lane_volumes: BTreeSet<(LaneId, VolumeKey)>,
    /// GC pressure of the most-pressured array last cycle.
    pub gc_pressure: GcPressure,
    /// Free segments of the most-pressured array last cycle.
    pub free_segments: u32,
}

// ──────────────────── context ────────────────────

/// The single shared mutable blob: user policy, measured parameters,
/// correction directives, resource counters, and active-volume bookkeeping.
#[derive(Debug)]
pub struct QosContext {
    /// Per-volume user policy as last observed by Monitoring.
    pub user_policy: QosUserPolicy,
    /// Measured parameters for the current cycle.
    pub parameters: QosParameters,
    /// Correction directives for the current cycle.
    pub correction: QosCorrection,
    /// Resource counters refreshed by Monitoring.
    pub resource: QosResource,
    /// Last-cycle state stored by Policy for next cycle's diffs.
    pub snapshot: PolicySnapshot,

    active_volumes: BTreeSet<VolumeKey>,
    active_lane_volumes: BTreeSet<(LaneId, VolumeKey)>,
    volume_connections: BTreeMap<VolumeKey, BTreeMap<LaneId, u32>>,
    total_connections: BTreeMap<VolumeKey, u32>,
    inactive_lanes: BTreeMap<VolumeKey, Vec<LaneId>>,

    barrier: Arc<ReactorBarrier>,
    apply_correction: bool,
    correction_cycle: u64,
    correction_cycle_period: u64,
    default_weight: i32,
    array_count: u32,
}

impl QosContext {
    /// Build a context sized for the configured topology.
    #[must_use]
    pub fn new(config: &QosConfig) -> Self {
        Self {
            user_policy: QosUserPolicy::default(),
            parameters: QosParameters::default(),
            correction: QosCorrection::new(config.wrr.default_weight),
            resource: QosResource::new(config.engine.array_count),
            snapshot: PolicySnapshot::default(),
            active_volumes: BTreeSet::new(),
            active_lane_volumes: BTreeSet::new(),
            volume_connections: BTreeMap::new(),
            total_connections: BTreeMap::new(),
            inactive_lanes: BTreeMap::new(),
            barrier: Arc::new(ReactorBarrier::new(config.engine.lane_count)),
            apply_correction: false,
            correction_cycle: 0,
            correction_cycle_period: config.engine.correction_cycle_period,
            default_weight: config.wrr.default_weight,
            array_count: config.engine.array_count,
        }
    }

    /// Clear all sub-state. Called at construction and when an operator
    /// re-arms the engine; never concurrently with a manager's execute.
    pub fn reset(&mut self) {
        self.user_policy.reset();
        self.parameters.reset();
        self.correction.reset(self.default_weight);
        self.resource.reset();
        self.snapshot = PolicySnapshot::default();
        self.active_volumes.clear();
        self.active_lane_volumes.clear();
        self.volume_connections.clear();
        self.total_connections.clear();
        self.inactive_lanes.clear();
        self.barrier.reset();
        self.apply_correction = false;
        self.correction_cycle = 0;
    }

    // ──────────────────── active-volume bookkeeping ────────────────────

    /// Clear the per-cycle active sets ahead of a fresh gather.
    pub fn reset_active_volumes(&mut self) {
        self.active_volumes.clear();
        self.active_lane_volumes.clear();
    }

    /// Record a volume that produced a valid sample this cycle.
    pub fn insert_active_volume(&mut self, key: VolumeKey) {
        self.active_volumes.insert(key);
    }

    /// Record a (lane, volume) pairing seen this cycle.
    pub fn insert_active_lane_volume(&mut self, lane: LaneId, key: VolumeKey) {
        self.active_lane_volumes.insert((lane, key));
    }

    /// Volumes active this cycle.
    #[must_use]
    pub fn active_volumes(&self) -> &BTreeSet<VolumeKey> {
        &self.active_volumes
    }

    /// (lane, volume) pairs active this cycle.
    #[must_use]
    pub fn active_lane_volumes(&self) -> &BTreeSet<(LaneId, VolumeKey)> {
        &self.active_lane_volumes
    }

    /// Number of (lane, volume) pairs active this cycle.
    #[must_use]
    pub fn active_lane_volume_count(&self) -> usize {
        self.active_lane_volumes.len()
    }

    /// Replace the per-volume lane connection map.
    pub fn set_volume_connections(&mut self, map: BTreeMap<VolumeKey, BTreeMap<LaneId, u32>>) {
        self.volume_connections = map;
    }

    /// Lanes carrying connections for one volume.
    #[must_use]
    pub fn volume_lanes(&self, key: VolumeKey) -> Option<&BTreeMap<LaneId, u32>> {
        self.volume_connections.get(&key)
    }

    /// Store a volume's total connection count across lanes.
    pub fn set_total_connections(&mut self, key: VolumeKey, count: u32) {
        self.total_connections.insert(key, count);
    }

    /// A volume's total connection count, zero when never observed.
    #[must_use]
    pub fn total_connections(&self, key: VolumeKey) -> u32 {
        self.total_connections.get(&key).copied().unwrap_or(0)
    }

    /// Replace the inactive-lane lists (lanes with no live connection for a
    /// volume, kept so their residual limits can be zeroed).
    pub fn set_inactive_lanes(&mut self, map: BTreeMap<VolumeKey, Vec<LaneId>>) {
        self.inactive_lanes = map;
    }

    /// Lanes with no live connection for a volume.
    #[must_use]
    pub fn inactive_lanes(&self, key: VolumeKey) -> &[LaneId] {
        self.inactive_lanes.get(&key).map_or(&[], Vec::as_slice)
    }

    // ──────────────────── barrier ────────────────────

    /// Shared handle for pollers to report per-cycle completion.
    #[must_use]
    pub fn barrier(&self) -> Arc<ReactorBarrier> {
        Arc::clone(&self.barrier)
    }

    /// Whether all lanes have reported since the last barrier reset.
    #[must_use]
    pub fn all_lanes_processed(&self) -> bool {
        self.barrier.all_processed()
    }

    /// Re-arm the barrier for the next cycle.
    pub fn reset_lane_barrier(&self) {
        self.barrier.reset();
    }

    // ──────────────────── correction cycle ────────────────────

    /// Set whether Correction should run after this Policy pass.
    pub fn set_apply_correction(&mut self, apply: bool) {
        self.apply_correction = apply;
    }

    /// Whether Correction should run after this Policy pass.
    #[must_use]
    pub const fn apply_correction(&self) -> bool {
        self.apply_correction
    }

    /// Bump the correction-cycle counter; called once per Policy pass.
    pub fn increment_correction_cycle(&mut self) {
        self.correction_cycle += 1;
    }

    /// True once per `correction_cycle_period` increments; consuming resets
    /// the counter.
    pub fn is_correction_cycle_over(&mut self) -> bool {
        if self.correction_cycle >= self.correction_cycle_period {
            self.correction_cycle = 0;
            true
        } else {
            false
        }
    }

    /// Number of arrays this context serves.
    #[must_use]
    pub const fn array_count(&self) -> u32 {
        self.array_count
    }
}
