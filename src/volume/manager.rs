//! Front-end admission control for one storage array.
//!
//! `QosVolumeManager` owns the per-volume token budgets, the lane-local rate
//! limiter, the pending-I/O queues, and the subsystem-to-volume map. The hot
//! path (`handle_io_submission`) touches only atomics and one per-slot mutex;
//! everything that must mutate shared topology funnels through the owner
//! lane via the lifecycle inbox.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::bridge::{LaneLocator, LaneRouter, SubmissionAdapter};
use crate::context::ReactorBarrier;
use crate::context::user_policy::VolumeUserPolicy;
use crate::core::config::QosConfig;
use crate::core::errors::{QosError, Result};
use crate::core::types::{ArrayId, LaneId, NqnId, RebuildImpact, ThrottleMetric, VolumeId, VolumeIo};
use crate::volume::io_queue::IoQueuePool;
use crate::volume::lifecycle::{LifecycleInbox, LifecycleOp};
use crate::volume::parameter_queue::{ParameterQueuePool, VolumeSample};
use crate::volume::rate_limit::RateLimiter;

const LIFECYCLE_INBOX_CAPACITY: usize = 64;

/// Admission control and budget accounting for one array.
pub struct QosVolumeManager {
    array_id: ArrayId,
    config: QosConfig,
    lifecycle_timeout: Duration,

    // Lane-major per-(lane, volume) rate-limit targets, written by the
    // correction path, read by each lane's poller on reset.
    bw_limit: Vec<AtomicI64>,
    iops_limit: Vec<AtomicI64>,

    // Array-global per-volume remaining budgets with deficit carry-over.
    remaining_bw: Vec<AtomicI64>,
    remaining_iops: Vec<AtomicI64>,
    last_replenished_cycle: Vec<AtomicU64>,
    cycle: AtomicU64,

    // Per-(lane, volume) dispatched load since the lane's last poll,
    // published to Monitoring through the sample queues.
    dispatched_bw: Vec<AtomicU64>,
    dispatched_iops: Vec<AtomicU64>,

    rate_limiter: RateLimiter,
    queues: IoQueuePool,
    samples: ParameterQueuePool,
    inbox: LifecycleInbox,

    subsystem_volumes: RwLock<HashMap<NqnId, Vec<VolumeId>>>,
    policies: RwLock<HashMap<VolumeId, VolumeUserPolicy>>,
    policy_dirty: AtomicBool,
    rebuild_impact: RwLock<RebuildImpact>,

    locator: Arc<dyn LaneLocator>,
    router: Arc<dyn LaneRouter>,
    barrier: Arc<ReactorBarrier>,
    exit: Arc<AtomicBool>,
}

impl std::fmt::Debug for QosVolumeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QosVolumeManager")
            .field("array_id", &self.array_id)
            .field("cycle", &self.cycle.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl QosVolumeManager {
    /// Build a manager for one array with arenas sized by the fixed topology.
    #[must_use]
    pub fn new(
        array_id: ArrayId,
        config: &QosConfig,
        locator: Arc<dyn LaneLocator>,
        router: Arc<dyn LaneRouter>,
        barrier: Arc<ReactorBarrier>,
        exit: Arc<AtomicBool>,
    ) -> Self {
        let lanes = config.engine.lane_count;
        let volumes = config.engine.max_volume_count;
        let lane_slots = (lanes as usize) * (volumes as usize);
        let volume_slots = volumes as usize;

        Self {
            array_id,
            config: config.clone(),
            lifecycle_timeout: Duration::from_millis(config.engine.lifecycle_timeout_ms),
            bw_limit: (0..lane_slots).map(|_| AtomicI64::new(0)).collect(),
            iops_limit: (0..lane_slots).map(|_| AtomicI64::new(0)).collect(),
            remaining_bw: (0..volume_slots).map(|_| AtomicI64::new(0)).collect(),
            remaining_iops: (0..volume_slots).map(|_| AtomicI64::new(0)).collect(),
            last_replenished_cycle: (0..volume_slots).map(|_| AtomicU64::new(0)).collect(),
            cycle: AtomicU64::new(0),
            dispatched_bw: (0..lane_slots).map(|_| AtomicU64::new(0)).collect(),
            dispatched_iops: (0..lane_slots).map(|_| AtomicU64::new(0)).collect(),
            rate_limiter: RateLimiter::new(lanes, volumes),
            queues: IoQueuePool::new(lanes, volumes),
            samples: ParameterQueuePool::new(lanes, volumes),
            inbox: LifecycleInbox::new(LIFECYCLE_INBOX_CAPACITY),
            subsystem_volumes: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
            policy_dirty: AtomicBool::new(false),
            rebuild_impact: RwLock::new(RebuildImpact::default()),
            locator,
            router,
            barrier,
            exit,
        }
    }

    /// The array this manager serves.
    #[must_use]
    pub const fn array_id(&self) -> ArrayId {
        self.array_id
    }

    fn check_lane(&self, lane: LaneId) -> Result<()> {
        if lane >= self.config.engine.lane_count {
            return Err(QosError::LaneOutOfRange {
                lane,
                max: self.config.engine.lane_count,
            });
        }
        Ok(())
    }

    fn check_volume(&self, volume: VolumeId) -> Result<()> {
        if volume >= self.config.engine.max_volume_count {
            return Err(QosError::VolumeOutOfRange {
                volume_id: volume,
                max: self.config.engine.max_volume_count,
            });
        }
        Ok(())
    }

    fn lane_slot(&self, lane: LaneId, volume: VolumeId) -> usize {
        (lane as usize) * (self.config.engine.max_volume_count as usize) + (volume as usize)
    }

    // ──────────────────── limit configuration ────────────────────

    /// Set one (lane, volume) rate-limit target; picked up by the lane's
    /// next poller reset.
    pub fn set_volume_limit(
        &self,
        lane: LaneId,
        volume: VolumeId,
        value: i64,
        metric: ThrottleMetric,
    ) -> Result<()> {
        self.check_lane(lane)?;
        self.check_volume(volume)?;
        let slot = self.lane_slot(lane, volume);
        match metric {
            ThrottleMetric::Bandwidth => self.bw_limit[slot].store(value, Ordering::Relaxed),
            ThrottleMetric::Iops => self.iops_limit[slot].store(value, Ordering::Relaxed),
        }
        Ok(())
    }

    /// Read one (lane, volume) rate-limit target.
    pub fn get_volume_limit(
        &self,
        lane: LaneId,
        volume: VolumeId,
        metric: ThrottleMetric,
    ) -> Result<i64> {
        self.check_lane(lane)?;
        self.check_volume(volume)?;
        let slot = self.lane_slot(lane, volume);
        Ok(match metric {
            ThrottleMetric::Bandwidth => self.bw_limit[slot].load(Ordering::Relaxed),
            ThrottleMetric::Iops => self.iops_limit[slot].load(Ordering::Relaxed),
        })
    }

    // ──────────────────── admission fast path ────────────────────

    /// Admit or queue one foreground I/O. Never blocks; a throttled I/O is
    /// queued for the poller, never rejected.
    pub fn handle_io_submission(
        &self,
        adapter: &dyn SubmissionAdapter,
        lane: LaneId,
        io: VolumeIo,
    ) -> Result<()> {
        if !self.config.engine.fe_qos_enabled {
            adapter.submit(io);
            return Ok(());
        }
        self.check_lane(lane)?;
        self.check_volume(io.volume_id)?;

        let volume = io.volume_id;
        if self.queues.is_empty(lane, volume) && self.budget_covers(volume, io.length) {
            self.submit_one(adapter, lane, volume, io);
        } else {
            self.queues.enqueue(lane, volume, io);
            self.drain_pending(adapter, lane, volume);
        }
        Ok(())
    }

    /// Whether the global budget covers an I/O of `size` bytes. The charge
    /// is capped at one full cycle quota, so an I/O larger than the quota
    /// admits once the budget is fully replenished and the overdraw is
    /// carried into the following cycles.
    fn budget_covers(&self, volume: VolumeId, size: u64) -> bool {
        let quota = {
            let policies = self.policies.read();
            let policy = policies.get(&volume).copied().unwrap_or_default();
            self.config.cycle_quota(policy.max_bandwidth)
        };
        let need = quota.min(i64::try_from(size).unwrap_or(i64::MAX));
        self.remaining_bw[volume as usize].load(Ordering::Relaxed) >= need
            && self.remaining_iops[volume as usize].load(Ordering::Relaxed) >= 1
    }

    /// Dispatch one I/O and charge every counter it consumes.
    fn submit_one(&self, adapter: &dyn SubmissionAdapter, lane: LaneId, volume: VolumeId, io: VolumeIo) {
        let size = io.length;
        self.remaining_bw[volume as usize].fetch_sub(size as i64, Ordering::Relaxed);
        self.remaining_iops[volume as usize].fetch_sub(1, Ordering::Relaxed);
        self.rate_limiter.update(lane, volume, size);

        let slot = self.lane_slot(lane, volume);
        self.dispatched_bw[slot].fetch_add(size, Ordering::Relaxed);
        self.dispatched_iops[slot].fetch_add(1, Ordering::Relaxed);

        adapter.submit(io);
    }

    /// Drain the pending FIFO in order while the budget covers each head
    /// I/O and shutdown is not requested.
    fn drain_pending(&self, adapter: &dyn SubmissionAdapter, lane: LaneId, volume: VolumeId) {
        while !self.exit.load(Ordering::Relaxed) {
            let Some(io) =
                self.queues
                    .dequeue_if(lane, volume, |head| self.budget_covers(volume, head.length))
            else {
                break;
            };
            self.submit_one(adapter, lane, volume, io);
        }
    }

    // ──────────────────── periodic poller ────────────────────

    /// Per-lane periodic tick: replenish budgets, re-arm the lane limiter,
    /// publish this lane's samples, and drain pending queues. `offset` is
    /// the fraction of a time slice elapsed since this lane's last tick.
    pub fn volume_qos_poller(&self, lane: LaneId, adapter: &dyn SubmissionAdapter, offset: f64) {
        if !self.config.engine.fe_qos_enabled || self.check_lane(lane).is_err() {
            return;
        }

        if lane == self.locator.first_lane() {
            self.inbox.drain(|op| self.apply_lifecycle(op));
            self.cycle.fetch_add(1, Ordering::Relaxed);
        }

        let routed: Vec<VolumeId> = {
            let map = self.subsystem_volumes.read();
            let mut volumes: Vec<VolumeId> = map
                .iter()
                .filter(|(nqn, _)| self.router.subsystem_on_lane(lane, **nqn))
                .flat_map(|(_, vols)| vols.iter().copied())
                .collect();
            volumes.sort_unstable();
            volumes.dedup();
            volumes
        };

        for volume in routed {
            self.try_replenish(volume);

            let slot = self.lane_slot(lane, volume);
            let bw_limit = self.bw_limit[slot].load(Ordering::Relaxed);
            let iops_limit = self.iops_limit[slot].load(Ordering::Relaxed);
            self.rate_limiter.reset(lane, volume, offset, bw_limit, iops_limit);

            let bandwidth = self.dispatched_bw[slot].swap(0, Ordering::Relaxed);
            let iops = self.dispatched_iops[slot].swap(0, Ordering::Relaxed);
            self.samples.push(lane, volume, VolumeSample { bandwidth, iops });

            self.drain_pending(adapter, lane, volume);
        }

        self.barrier.set_processed(lane);
    }

    /// Replenish at most once per engine cycle, whichever lane's poller
    /// gets there first.
    fn try_replenish(&self, volume: VolumeId) {
        let current = self.cycle.load(Ordering::Relaxed);
        let last = self.last_replenished_cycle[volume as usize].load(Ordering::Relaxed);
        if last == current {
            return;
        }
        if self.last_replenished_cycle[volume as usize]
            .compare_exchange(last, current, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            self.reset_volume_throttling(volume);
        }
    }

    /// Budget replenishment with deficit carry-over: an unspent budget
    /// resets to one cycle's quota; an overspent one is charged against the
    /// next cycle's allowance.
    pub fn reset_volume_throttling(&self, volume: VolumeId) {
        let policy = self
            .policies
            .read()
            .get(&volume)
            .copied()
            .unwrap_or_default();
        Self::replenish(
            &self.remaining_bw[volume as usize],
            self.config.cycle_quota(policy.max_bandwidth),
        );
        Self::replenish(
            &self.remaining_iops[volume as usize],
            self.config.cycle_quota(policy.max_iops),
        );
    }

    fn replenish(remaining: &AtomicI64, quota: i64) {
        let _ = remaining.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |r| {
            Some(if r > 0 { quota } else { r.saturating_add(quota) })
        });
    }

    /// Remaining array-global budget for one volume.
    #[must_use]
    pub fn remaining_budget(&self, volume: VolumeId, metric: ThrottleMetric) -> i64 {
        match metric {
            ThrottleMetric::Bandwidth => self.remaining_bw[volume as usize].load(Ordering::Relaxed),
            ThrottleMetric::Iops => self.remaining_iops[volume as usize].load(Ordering::Relaxed),
        }
    }

    /// Pop one published sample for Monitoring; `None` when drained.
    pub fn pop_sample(&self, lane: LaneId, volume: VolumeId) -> Option<VolumeSample> {
        self.samples.pop(lane, volume)
    }

    // ──────────────────── subsystem map ────────────────────

    /// Attach a volume to a subsystem. Idempotent.
    pub fn update_subsystem_to_volume_map(&self, nqn: NqnId, volume: VolumeId) {
        let mut map = self.subsystem_volumes.write();
        let volumes = map.entry(nqn).or_default();
        if !volumes.contains(&volume) {
            volumes.push(volume);
        }
    }

    /// Detach a volume from a subsystem. Idempotent; removes the subsystem
    /// entry once its last volume is gone.
    pub fn delete_volume_from_subsystem_map(&self, nqn: NqnId, volume: VolumeId) {
        let mut map = self.subsystem_volumes.write();
        if let Some(volumes) = map.get_mut(&nqn) {
            volumes.retain(|v| *v != volume);
            if volumes.is_empty() {
                map.remove(&nqn);
            }
        }
    }

    /// Snapshot of the subsystem-to-volume map for Monitoring's connection
    /// accounting.
    #[must_use]
    pub fn subsystem_snapshot(&self) -> Vec<(NqnId, Vec<VolumeId>)> {
        self.subsystem_volumes
            .read()
            .iter()
            .map(|(nqn, vols)| (*nqn, vols.clone()))
            .collect()
    }

    // ──────────────────── policy store ────────────────────

    /// Whether lifecycle callbacks changed the policy map since the last
    /// Monitoring snapshot.
    #[must_use]
    pub fn policy_dirty(&self) -> bool {
        self.policy_dirty.load(Ordering::Acquire)
    }

    /// Acknowledge the dirty flag after snapshotting.
    pub fn clear_policy_dirty(&self) {
        self.policy_dirty.store(false, Ordering::Release);
    }

    /// Current policy map snapshot.
    #[must_use]
    pub fn volume_policies(&self) -> Vec<(VolumeId, VolumeUserPolicy)> {
        self.policies
            .read()
            .iter()
            .map(|(vol, policy)| (*vol, *policy))
            .collect()
    }

    /// One volume's stored policy.
    #[must_use]
    pub fn volume_policy(&self, volume: VolumeId) -> Option<VolumeUserPolicy> {
        self.policies.read().get(&volume).copied()
    }

    fn store_policy(&self, volume: VolumeId, policy: VolumeUserPolicy) {
        self.policies.write().insert(volume, policy);
        self.policy_dirty.store(true, Ordering::Release);
    }

    /// Operator changed the array's rebuild-impact priority.
    pub fn update_rebuild_impact(&self, impact: RebuildImpact) {
        *self.rebuild_impact.write() = impact;
    }

    /// Current rebuild-impact priority for this array.
    #[must_use]
    pub fn rebuild_impact(&self) -> RebuildImpact {
        *self.rebuild_impact.read()
    }

    // ──────────────────── lifecycle callbacks ────────────────────

    /// Volume created: record its policy for the next Monitoring diff.
    pub fn volume_created(&self, volume: VolumeId, policy: VolumeUserPolicy) -> Result<()> {
        self.check_volume(volume)?;
        self.store_policy(volume, policy);
        Ok(())
    }

    /// Volume policy updated by the operator.
    pub fn volume_updated(&self, volume: VolumeId, policy: VolumeUserPolicy) -> Result<()> {
        self.check_volume(volume)?;
        self.store_policy(volume, policy);
        Ok(())
    }

    /// Volume loaded from array metadata at array mount.
    pub fn volume_loaded(&self, volume: VolumeId, policy: VolumeUserPolicy) -> Result<()> {
        self.check_volume(volume)?;
        self.store_policy(volume, policy);
        Ok(())
    }

    /// Volume deleted: drop its policy.
    pub fn volume_deleted(&self, volume: VolumeId) -> Result<()> {
        self.check_volume(volume)?;
        self.policies.write().remove(&volume);
        self.policy_dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Volume mounted into a subsystem: record the policy, then build the
    /// map entry and arm the throttle slots on the owner lane.
    pub fn volume_mounted(
        &self,
        volume: VolumeId,
        nqn: NqnId,
        policy: VolumeUserPolicy,
    ) -> Result<()> {
        self.check_volume(volume)?;
        self.store_policy(volume, policy);
        self.run_on_owner(LifecycleOp::Mount { volume, nqn })
    }

    /// Volume unmounted: shrink the map and zero the throttle slots on the
    /// owner lane.
    pub fn volume_unmounted(&self, volume: VolumeId, nqn: NqnId) -> Result<()> {
        self.check_volume(volume)?;
        self.policy_dirty.store(true, Ordering::Release);
        self.run_on_owner(LifecycleOp::Unmount { volume, nqn })
    }

    /// Subsystem detached: unmount every volume still attached to it.
    pub fn subsystem_detached(&self, nqn: NqnId) -> Result<()> {
        self.run_on_owner(LifecycleOp::DetachSubsystem { nqn })
    }

    /// Run inline when already on the owner lane, otherwise hand off and
    /// wait for the ack.
    fn run_on_owner(&self, op: LifecycleOp) -> Result<()> {
        if self.locator.current_lane() == Some(self.locator.first_lane()) {
            self.apply_lifecycle(op);
            Ok(())
        } else {
            self.inbox.dispatch(op, self.lifecycle_timeout)
        }
    }

    fn apply_lifecycle(&self, op: LifecycleOp) {
        match op {
            LifecycleOp::Mount { volume, nqn } => {
                self.update_subsystem_to_volume_map(nqn, volume);
                self.arm_volume(volume);
            }
            LifecycleOp::Unmount { volume, nqn } => {
                self.delete_volume_from_subsystem_map(nqn, volume);
                self.disarm_volume(volume);
            }
            LifecycleOp::DetachSubsystem { nqn } => {
                let volumes = self.subsystem_volumes.write().remove(&nqn).unwrap_or_default();
                for volume in volumes {
                    self.disarm_volume(volume);
                }
            }
        }
    }

    /// Seed the budgets and per-lane limits from the stored policy so the
    /// first I/O after mount is admitted without waiting for a correction
    /// pass.
    fn arm_volume(&self, volume: VolumeId) {
        let policy = self
            .policies
            .read()
            .get(&volume)
            .copied()
            .unwrap_or_default();
        let bw_quota = self.config.cycle_quota(policy.max_bandwidth);
        let iops_quota = self.config.cycle_quota(policy.max_iops);

        for lane in 0..self.config.engine.lane_count {
            let slot = self.lane_slot(lane, volume);
            self.bw_limit[slot].store(bw_quota, Ordering::Relaxed);
            self.iops_limit[slot].store(iops_quota, Ordering::Relaxed);
        }
        self.remaining_bw[volume as usize].store(bw_quota, Ordering::Relaxed);
        self.remaining_iops[volume as usize].store(iops_quota, Ordering::Relaxed);
        self.last_replenished_cycle[volume as usize]
            .store(self.cycle.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    fn disarm_volume(&self, volume: VolumeId) {
        for lane in 0..self.config.engine.lane_count {
            let slot = self.lane_slot(lane, volume);
            self.bw_limit[slot].store(0, Ordering::Relaxed);
            self.iops_limit[slot].store(0, Ordering::Relaxed);
        }
        self.remaining_bw[volume as usize].store(0, Ordering::Relaxed);
        self.remaining_iops[volume as usize].store(0, Ordering::Relaxed);
    }
}
