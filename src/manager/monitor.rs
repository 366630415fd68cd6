//! Monitoring pass: pulls user policy, per-lane volume samples, connection
//! topology, and resource counters into the context ahead of Policy.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use crate::bridge::PolicySource;
use crate::context::VolumeKey;
use crate::core::types::{BackendEvent, LaneId};

use super::{ManagerDeps, ManagerKind};

/// First stage of the control loop. Stateless; everything it learns lands in
/// the context.
#[derive(Debug, Default)]
pub struct QosMonitoringManager;

impl QosMonitoringManager {
    /// A fresh pass; carries no state of its own.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// One monitoring pass. Always hands off to Policy.
    pub fn execute(&mut self, deps: &mut ManagerDeps<'_>) -> ManagerKind {
        if deps.config.engine.fe_qos_enabled {
            self.refresh_volume_policies(deps);
            self.gather_volume_parameters(deps);
        }
        self.refresh_rebuild_policy(deps);
        self.drain_event_bandwidth(deps);
        self.refresh_resource_state(deps);
        ManagerKind::Policy
    }

    /// Diff the per-array policy stores against the context copy; rewrite
    /// changed entries and recompute the minimum-guarantee bookkeeping.
    fn refresh_volume_policies(&self, deps: &mut ManagerDeps<'_>) {
        for array in 0..deps.config.engine.array_count {
            if !deps.volumes.policy_dirty(array) {
                continue;
            }
            for (volume, policy) in deps.volumes.volume_policies(array) {
                let key = VolumeKey::new(array, volume);
                let previous = deps.context.user_policy.volumes.get(key).copied();
                let max_changed = previous.is_none_or(|p| {
                    p.max_bandwidth != policy.max_bandwidth || p.max_iops != policy.max_iops
                });
                if max_changed {
                    deps.context
                        .user_policy
                        .volumes
                        .set_max_throttling_changed(true);
                }
                deps.context.user_policy.volumes.insert(key, policy);
            }
            deps.volumes.clear_policy_dirty(array);
        }
        self.recompute_minimum_guarantee(deps);
    }

    /// One volume at most carries the minimum guarantee; ties break toward
    /// the lowest (array, volume) key so the choice is stable across cycles.
    fn recompute_minimum_guarantee(&self, deps: &mut ManagerDeps<'_>) {
        let volumes = &mut deps.context.user_policy.volumes;
        let min_key = volumes
            .iter()
            .filter(|(_, policy)| policy.has_min_guarantee())
            .map(|(key, _)| *key)
            .min();
        let is_bandwidth = min_key
            .and_then(|key| volumes.get(key))
            .is_some_and(|policy| policy.min_is_bandwidth());
        volumes.set_minimum_guarantee_volume(min_key);
        volumes.set_min_policy_in_effect(min_key.is_some());
        volumes.set_min_policy_is_bandwidth(is_bandwidth);
    }

    /// Drain every (lane, volume) sample queue into the per-volume aggregate
    /// parameters, rebuild the active sets, and recount connections.
    fn gather_volume_parameters(&self, deps: &mut ManagerDeps<'_>) {
        let lane_count = deps.config.engine.lane_count;
        deps.context.reset_active_volumes();
        deps.context.parameters.reset();
        deps.context.correction.volume_throttle.reset();

        let mut connections: BTreeMap<VolumeKey, BTreeMap<LaneId, u32>> = BTreeMap::new();
        let mut inactive: BTreeMap<VolumeKey, Vec<LaneId>> = BTreeMap::new();

        for (array, manager) in deps.volumes.iter().enumerate() {
            let array = array as u32;
            for (nqn, volumes) in manager.subsystem_snapshot() {
                for lane in 0..lane_count {
                    let routed = deps.router.subsystem_on_lane(lane, nqn);
                    for &volume in &volumes {
                        let key = VolumeKey::new(array, volume);
                        if !routed {
                            inactive.entry(key).or_default().push(lane);
                            continue;
                        }
                        let count = deps.router.connection_count(lane, nqn);
                        if count > 0 {
                            *connections
                                .entry(key)
                                .or_default()
                                .entry(lane)
                                .or_insert(0) += count;
                        }
                        let mut sampled = false;
                        while let Some(sample) = manager.pop_sample(lane, volume) {
                            deps.context
                                .parameters
                                .volume_mut(key)
                                .accumulate_lane(lane, sample.bandwidth, sample.iops);
                            sampled = true;
                        }
                        if sampled {
                            deps.context.insert_active_volume(key);
                            deps.context.insert_active_lane_volume(lane, key);
                        }
                    }
                }
            }
        }

        deps.context.parameters.sum_all_lanes();

        let active: Vec<VolumeKey> = deps.context.active_volumes().iter().copied().collect();
        for key in active {
            deps.context.correction.volume_throttle.insert(key);
        }

        for (key, lanes) in &connections {
            let total = lanes.values().sum::<u32>();
            deps.context.set_total_connections(*key, total);
        }
        deps.context.set_volume_connections(connections);
        deps.context.set_inactive_lanes(inactive);

        // Re-arm the poller barrier once every lane has reported a cycle.
        if deps.context.all_lanes_processed() {
            deps.context.reset_lane_barrier();
        }
    }

    fn refresh_rebuild_policy(&self, deps: &mut ManagerDeps<'_>) {
        for array in 0..deps.config.engine.array_count {
            let impact = deps.volumes.rebuild_impact(array);
            deps.context.user_policy.rebuild.observe(array, impact);
        }
    }

    /// Empty each backend event's bandwidth sample queue; bounded by the
    /// queues running dry or shutdown being signalled.
    fn drain_event_bandwidth(&self, deps: &mut ManagerDeps<'_>) {
        for event in BackendEvent::ALL {
            while !deps.exit.load(Ordering::Relaxed) {
                let Some(sample) = deps.resources.poll_event_bandwidth(event) else {
                    break;
                };
                deps.context.parameters.add_event_bandwidth(event, sample);
            }
        }
    }

    fn refresh_resource_state(&self, deps: &mut ManagerDeps<'_>) {
        let mut stripes = 0;
        for array in 0..deps.config.engine.array_count {
            let free = deps.resources.free_segments(array);
            if let Some(state) = deps.context.resource.array_mut(array) {
                state.update(free, &deps.config.urgency);
            }
            stripes = stripes.max(deps.resources.used_nvram_stripes(array));
        }
        deps.context.resource.nvram.set_used_stripes(stripes);

        for event in BackendEvent::ALL {
            deps.context
                .resource
                .cpu
                .set_pending(event, deps.resources.pending_backend_io(event));
            deps.context
                .resource
                .cpu
                .set_generated(event, deps.resources.generated_backend_io(event));
        }
    }
}
