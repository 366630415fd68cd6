//! User-configured QoS policy state: per-volume min/max targets and the
//! per-array rebuild-impact priority.

#![allow(missing_docs)]

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::context::VolumeKey;
use crate::core::types::{ArrayId, RebuildImpact};

/// Limit value meaning "no user cap configured". Budget arithmetic treats it
/// as an effectively infinite per-cycle quota.
pub const UNLIMITED: u64 = u64::MAX / 4;

// ──────────────────── per-volume policy ────────────────────

/// One volume's user-configured throttle targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeUserPolicy {
    pub max_bandwidth: u64,
    pub max_iops: u64,
    pub min_bandwidth: u64,
    pub min_iops: u64,
}

impl Default for VolumeUserPolicy {
    fn default() -> Self {
        Self {
            max_bandwidth: UNLIMITED,
            max_iops: UNLIMITED,
            min_bandwidth: 0,
            min_iops: 0,
        }
    }
}

impl VolumeUserPolicy {
    /// Whether either minimum guarantee is requested.
    #[must_use]
    pub const fn has_min_guarantee(&self) -> bool {
        self.min_bandwidth > 0 || self.min_iops > 0
    }

    /// The bandwidth-vs-iops discriminator for the minimum policy; only
    /// meaningful when [`Self::has_min_guarantee`] holds.
    #[must_use]
    pub const fn min_is_bandwidth(&self) -> bool {
        self.min_bandwidth > 0
    }
}

// ──────────────────── all-volume policy ────────────────────

/// Aggregated policy view across every (array, volume), plus the
/// minimum-guarantee bookkeeping the policy evaluator consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllVolumeUserPolicy {
    policies: HashMap<VolumeKey, VolumeUserPolicy>,
    minimum_guarantee_volume: Option<VolumeKey>,
    min_policy_in_effect: bool,
    min_policy_is_bandwidth: bool,
    max_throttling_changed: bool,
}

impl AllVolumeUserPolicy {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn insert(&mut self, key: VolumeKey, policy: VolumeUserPolicy) {
        self.policies.insert(key, policy);
    }

    #[must_use]
    pub fn get(&self, key: VolumeKey) -> Option<&VolumeUserPolicy> {
        self.policies.get(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VolumeKey, &VolumeUserPolicy)> {
        self.policies.iter()
    }

    #[must_use]
    pub fn minimum_guarantee_volume(&self) -> Option<VolumeKey> {
        self.minimum_guarantee_volume
    }

    pub fn set_minimum_guarantee_volume(&mut self, key: Option<VolumeKey>) {
        self.minimum_guarantee_volume = key;
    }

    #[must_use]
    pub const fn min_policy_in_effect(&self) -> bool {
        self.min_policy_in_effect
    }

    pub fn set_min_policy_in_effect(&mut self, value: bool) {
        self.min_policy_in_effect = value;
    }

    #[must_use]
    pub const fn min_policy_is_bandwidth(&self) -> bool {
        self.min_policy_is_bandwidth
    }

    pub fn set_min_policy_is_bandwidth(&mut self, value: bool) {
        self.min_policy_is_bandwidth = value;
    }

    #[must_use]
    pub const fn max_throttling_changed(&self) -> bool {
        self.max_throttling_changed
    }

    pub fn set_max_throttling_changed(&mut self, value: bool) {
        self.max_throttling_changed = value;
    }
}

// ──────────────────── rebuild policy ────────────────────

/// Per-array rebuild-impact priority with a sticky change flag consumed by
/// the event-CPU policy evaluator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildUserPolicy {
    impact: HashMap<ArrayId, RebuildImpact>,
    policy_changed: bool,
}

impl RebuildUserPolicy {
    pub fn reset(&mut self) {
        self.impact.clear();
        self.policy_changed = false;
    }

    #[must_use]
    pub fn rebuild_impact(&self, array_id: ArrayId) -> RebuildImpact {
        self.impact.get(&array_id).copied().unwrap_or_default()
    }

    /// Store a fresh observation, flagging a change when it differs from the
    /// previous one (the default impact for a never-seen array).
    pub fn observe(&mut self, array_id: ArrayId, impact: RebuildImpact) {
        let previous = self.impact.insert(array_id, impact).unwrap_or_default();
        if previous != impact {
            self.policy_changed = true;
        }
    }

    #[must_use]
    pub const fn policy_changed(&self) -> bool {
        self.policy_changed
    }

    pub fn clear_policy_changed(&mut self) {
        self.policy_changed = false;
    }

    /// Most impactful priority across all arrays; drives the shared rebuild
    /// event weight when several arrays rebuild at once.
    #[must_use]
    pub fn strongest_impact(&self) -> RebuildImpact {
        self.impact.values().copied().min().unwrap_or_default()
    }
}

// ──────────────────── combined view ────────────────────

/// Everything the user has asked for, as last observed by Monitoring.
#[derive(Debug, Clone, Default)]
pub struct QosUserPolicy {
    pub volumes: AllVolumeUserPolicy,
    pub rebuild: RebuildUserPolicy,
}

impl QosUserPolicy {
    pub fn reset(&mut self) {
        self.volumes.reset();
        self.rebuild.reset();
    }
}
