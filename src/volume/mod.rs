//! Front-end admission control: per-array volume managers, token budgets,
//! pending queues, and lifecycle plumbing.

pub mod io_queue;
pub mod lifecycle;
pub mod manager;
pub mod parameter_queue;
pub mod rate_limit;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::bridge::{LaneLocator, LaneRouter, PolicySource};
use crate::context::ReactorBarrier;
use crate::context::user_policy::VolumeUserPolicy;
use crate::core::config::QosConfig;
use crate::core::types::{ArrayId, RebuildImpact, VolumeId};

pub use manager::QosVolumeManager;
pub use parameter_queue::VolumeSample;

/// One `QosVolumeManager` per array, indexed by array id. This is the
/// engine's policy source: lifecycle callbacks write into the managers and
/// Monitoring diffs the stored maps each cycle.
#[derive(Debug)]
pub struct QosVolumeManagerSet {
    managers: Vec<Arc<QosVolumeManager>>,
}

impl QosVolumeManagerSet {
    /// Build one manager per configured array, all sharing the lane
    /// topology, barrier, and exit flag.
    #[must_use]
    pub fn new(
        config: &QosConfig,
        locator: Arc<dyn LaneLocator>,
        router: Arc<dyn LaneRouter>,
        barrier: Arc<ReactorBarrier>,
        exit: Arc<AtomicBool>,
    ) -> Self {
        let managers = (0..config.engine.array_count)
            .map(|array_id| {
                Arc::new(QosVolumeManager::new(
                    array_id,
                    config,
                    Arc::clone(&locator),
                    Arc::clone(&router),
                    Arc::clone(&barrier),
                    Arc::clone(&exit),
                ))
            })
            .collect();
        Self { managers }
    }

    /// Manager for one array, `None` when out of range.
    #[must_use]
    pub fn array(&self, array_id: ArrayId) -> Option<&Arc<QosVolumeManager>> {
        self.managers.get(array_id as usize)
    }

    /// All managers in array-id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<QosVolumeManager>> {
        self.managers.iter()
    }

    /// Number of arrays served.
    #[must_use]
    pub fn len(&self) -> usize {
        self.managers.len()
    }

    /// Whether the set holds no arrays.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

impl PolicySource for QosVolumeManagerSet {
    fn policy_dirty(&self, array: ArrayId) -> bool {
        self.array(array).is_some_and(|mgr| mgr.policy_dirty())
    }

    fn clear_policy_dirty(&self, array: ArrayId) {
        if let Some(mgr) = self.array(array) {
            mgr.clear_policy_dirty();
        }
    }

    fn volume_policies(&self, array: ArrayId) -> Vec<(VolumeId, VolumeUserPolicy)> {
        self.array(array)
            .map(|mgr| mgr.volume_policies())
            .unwrap_or_default()
    }

    fn rebuild_impact(&self, array: ArrayId) -> RebuildImpact {
        self.array(array)
            .map_or_else(RebuildImpact::default, |mgr| mgr.rebuild_impact())
    }
}
