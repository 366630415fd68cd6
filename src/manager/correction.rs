//! Correction pass: pushes the directives Policy produced out to the
//! backend scheduler and the per-array volume managers.

use crate::context::correction::WeightDirective;
use crate::context::VolumeKey;
use crate::core::types::{preset, BackendEvent, ThrottleMetric};
use crate::logger::jsonl::{EventType, LogEntry, Severity};

use super::{ManagerDeps, ManagerKind};

/// Third stage of the control loop. Stateless; consumes the correction
/// directives and flags in the context.
#[derive(Debug, Default)]
pub struct QosCorrectionManager;

impl QosCorrectionManager {
    /// A fresh pass; carries no state of its own.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Apply whatever corrections Policy flagged, clear the flags, and hand
    /// back to Monitoring.
    pub fn execute(&mut self, deps: &mut ManagerDeps<'_>) -> ManagerKind {
        let flags = deps.context.correction.flags;
        if flags.volume_throttle {
            self.handle_volume_correction(deps);
        }
        if flags.event_wrr {
            self.handle_wrr_correction(deps);
        }
        deps.context.correction.clear_flags();
        deps.context.set_apply_correction(false);
        deps.context
            .user_policy
            .volumes
            .set_max_throttling_changed(false);
        ManagerKind::Monitoring
    }

    // ──────────────────── event WRR weights ────────────────────

    /// Consume each event's directive, derive the new weight from the
    /// scheduler's current one, clamp, and push it back. The applied weight
    /// is mirrored into the context so later cycles can reason about it.
    fn handle_wrr_correction(&self, deps: &mut ManagerDeps<'_>) {
        let step = deps.config.wrr.unit_step;
        for event in BackendEvent::ALL {
            let directive = deps.context.correction.event_wrr.take_directive(event);
            if directive == WeightDirective::NoChange {
                continue;
            }
            let current = deps.scheduler.wrr_weight(event);
            let target = match directive {
                WeightDirective::NoChange => continue,
                WeightDirective::Increase => current.saturating_sub(3 * step),
                WeightDirective::Increase2X => current.saturating_sub(5 * step),
                WeightDirective::Increase4X => current.saturating_sub(10 * step),
                WeightDirective::Decrease => current.saturating_add(step),
                WeightDirective::Decrease2X => current.saturating_add(2 * step),
                WeightDirective::Decrease4X => current.saturating_add(4 * step),
                WeightDirective::PriorityHighest => preset::PRIO_WT_HIGHEST,
                WeightDirective::PriorityHigher => preset::PRIO_WT_HIGHER,
                WeightDirective::PriorityHigh => preset::PRIO_WT_HIGH,
                WeightDirective::PriorityMedium => preset::PRIO_WT_MEDIUM,
                WeightDirective::PriorityLow => preset::PRIO_WT_LOW,
                WeightDirective::PriorityLower => preset::PRIO_WT_LOWER,
                WeightDirective::PriorityLowest => preset::PRIO_WT_LOWEST,
                WeightDirective::Reset => deps.config.wrr.default_weight,
            };
            let weight = target.clamp(
                deps.config.wrr.max_negative_weight,
                deps.config.wrr.max_positive_weight,
            );
            deps.scheduler.set_wrr_weight(event, weight);
            deps.context.correction.event_wrr.set_weight(event, weight);

            let mut entry = LogEntry::new(EventType::WrrWeightApplied, Severity::Info);
            entry.backend_event = Some(event.to_string());
            entry.directive = Some(directive.to_string());
            entry.weight = Some(weight);
            deps.log.write(&entry);
        }
    }

    // ──────────────────── volume limits ────────────────────

    fn handle_volume_correction(&self, deps: &mut ManagerDeps<'_>) {
        if let Some(min_volume) = deps.context.user_policy.volumes.minimum_guarantee_volume() {
            // Guarantee enforcement is not wired up; leave a trace so the
            // operator can see the policy being observed but idle.
            let mut entry = LogEntry::new(EventType::MinGuaranteeUnenforced, Severity::Warning);
            entry.array = Some(min_volume.array);
            entry.volume = Some(min_volume.volume);
            deps.log.write(&entry);
        }
        self.handle_max_throttling(deps);
    }

    /// Push every active volume's user max limits down to its lanes,
    /// splitting each metric by the lane's share of the volume's
    /// connections. Residual limits on lanes the volume no longer reaches
    /// are zeroed.
    fn handle_max_throttling(&self, deps: &mut ManagerDeps<'_>) {
        let active: Vec<VolumeKey> = deps.context.active_volumes().iter().copied().collect();
        for key in active {
            let Some(manager) = deps.volumes.array(key.array) else {
                continue;
            };
            let Some(policy) = deps.context.user_policy.volumes.get(key).copied() else {
                continue;
            };
            let total = deps.context.total_connections(key);
            if total == 0 {
                continue;
            }
            let Some(lanes) = deps.context.volume_lanes(key) else {
                continue;
            };

            let min_bw = deps.config.throttle.min_bw_budget as i64;
            let min_iops = deps.config.throttle.min_iops_budget as i64;
            let mut pushed_bw = 0;
            let mut pushed_iops = 0;
            for (&lane, &count) in lanes {
                let bw = share(policy.max_bandwidth, count, total).max(min_bw);
                let iops = share(policy.max_iops, count, total).max(min_iops);
                if let Err(err) =
                    manager.set_volume_limit(lane, key.volume, bw, ThrottleMetric::Bandwidth)
                {
                    self.log_limit_error(deps.log, key, &err);
                    continue;
                }
                if let Err(err) =
                    manager.set_volume_limit(lane, key.volume, iops, ThrottleMetric::Iops)
                {
                    self.log_limit_error(deps.log, key, &err);
                    continue;
                }
                pushed_bw = bw;
                pushed_iops = iops;
            }

            for &lane in deps.context.inactive_lanes(key) {
                let _ = manager.set_volume_limit(lane, key.volume, 0, ThrottleMetric::Bandwidth);
                let _ = manager.set_volume_limit(lane, key.volume, 0, ThrottleMetric::Iops);
            }

            let mut entry = LogEntry::new(EventType::VolumeThrottlePushed, Severity::Info);
            entry.array = Some(key.array);
            entry.volume = Some(key.volume);
            entry.bw_limit = Some(pushed_bw);
            entry.iops_limit = Some(pushed_iops);
            deps.log.write(&entry);
        }
    }

    fn log_limit_error(
        &self,
        log: &mut crate::logger::DecisionLog,
        key: VolumeKey,
        err: &crate::core::errors::QosError,
    ) {
        let mut entry = LogEntry::new(EventType::Error, Severity::Critical);
        entry.array = Some(key.array);
        entry.volume = Some(key.volume);
        entry.error_code = Some(err.code().to_string());
        entry.details = Some(err.to_string());
        log.write(&entry);
    }
}

/// One lane's connection-weighted share of a metric limit, clamped into the
/// signed budget domain.
fn share(limit: u64, lane_connections: u32, total_connections: u32) -> i64 {
    let scaled = u128::from(limit) * u128::from(lane_connections) / u128::from(total_connections);
    if scaled > i64::MAX as u128 {
        i64::MAX
    } else {
        scaled as i64
    }
}

#[cfg(test)]
mod tests {
    use super::super::harness::Harness;
    use super::*;
    use crate::bridge::EventScheduler;
    use crate::context::user_policy::VolumeUserPolicy;
    use crate::core::config::QosConfig;

    fn run_correction(harness: &mut Harness) -> ManagerKind {
        QosCorrectionManager::new().execute(&mut harness.deps())
    }

    #[test]
    fn relative_directive_steps_from_scheduler_weight() {
        let mut harness = Harness::new(QosConfig::default());
        harness.config.wrr.unit_step = 2;
        harness
            .scheduler
            .set_wrr_weight(BackendEvent::GarbageCollection, 50);
        harness.context.correction.flags.event_wrr = true;
        harness
            .context
            .correction
            .event_wrr
            .set_directive(BackendEvent::GarbageCollection, WeightDirective::Increase4X);

        assert_eq!(run_correction(&mut harness), ManagerKind::Monitoring);
        // 50 - 10 * 2 = 30
        assert_eq!(
            harness.scheduler.wrr_weight(BackendEvent::GarbageCollection),
            30
        );
        assert_eq!(
            harness
                .context
                .correction
                .event_wrr
                .weight(BackendEvent::GarbageCollection),
            30,
            "applied weight is mirrored"
        );
    }

    #[test]
    fn priority_directive_jumps_to_preset() {
        let mut harness = Harness::new(QosConfig::default());
        harness
            .scheduler
            .set_wrr_weight(BackendEvent::UserdataRebuild, 30);
        harness.context.correction.flags.event_wrr = true;
        harness.context.correction.event_wrr.set_directive(
            BackendEvent::UserdataRebuild,
            WeightDirective::PriorityHighest,
        );

        run_correction(&mut harness);
        assert_eq!(
            harness.scheduler.wrr_weight(BackendEvent::UserdataRebuild),
            preset::PRIO_WT_HIGHEST
        );
    }

    #[test]
    fn weights_clamp_to_configured_bounds() {
        let mut harness = Harness::new(QosConfig::default());
        harness
            .scheduler
            .set_wrr_weight(BackendEvent::Flush, harness.config.wrr.max_positive_weight);
        harness.context.correction.flags.event_wrr = true;
        harness
            .context
            .correction
            .event_wrr
            .set_directive(BackendEvent::Flush, WeightDirective::Decrease4X);

        run_correction(&mut harness);
        assert_eq!(
            harness.scheduler.wrr_weight(BackendEvent::Flush),
            harness.config.wrr.max_positive_weight
        );
    }

    #[test]
    fn reset_restores_default_weight() {
        let mut harness = Harness::new(QosConfig::default());
        harness.scheduler.set_wrr_weight(BackendEvent::Flush, -500);
        harness.context.correction.flags.event_wrr = true;
        harness
            .context
            .correction
            .event_wrr
            .set_directive(BackendEvent::Flush, WeightDirective::Reset);

        run_correction(&mut harness);
        assert_eq!(
            harness.scheduler.wrr_weight(BackendEvent::Flush),
            harness.config.wrr.default_weight
        );
    }

    #[test]
    fn directives_are_consumed_by_application() {
        let mut harness = Harness::new(QosConfig::default());
        harness.context.correction.flags.event_wrr = true;
        harness
            .context
            .correction
            .event_wrr
            .set_directive(BackendEvent::Flush, WeightDirective::Decrease);

        run_correction(&mut harness);
        assert_eq!(
            harness
                .context
                .correction
                .event_wrr
                .directive(BackendEvent::Flush),
            WeightDirective::NoChange,
            "a second correction pass must not re-apply the step"
        );
    }

    #[test]
    fn max_throttling_splits_limits_by_connection_share() {
        let mut harness = Harness::new(QosConfig::default());
        let key = VolumeKey::new(0, 1);
        harness.context.user_policy.volumes.insert(
            key,
            VolumeUserPolicy {
                max_bandwidth: 300_000,
                max_iops: 3_000,
                ..VolumeUserPolicy::default()
            },
        );
        harness.context.insert_active_volume(key);
        harness.context.set_total_connections(key, 3);
        harness.context.set_volume_connections(
            [(key, [(0u32, 1u32), (1, 2)].into_iter().collect())]
                .into_iter()
                .collect(),
        );
        harness.context.correction.flags.volume_throttle = true;

        run_correction(&mut harness);
        let manager = harness.volumes.array(0).unwrap();
        assert_eq!(
            manager
                .get_volume_limit(0, 1, ThrottleMetric::Bandwidth)
                .unwrap(),
            100_000
        );
        assert_eq!(
            manager
                .get_volume_limit(1, 1, ThrottleMetric::Bandwidth)
                .unwrap(),
            200_000
        );
        assert_eq!(
            manager.get_volume_limit(1, 1, ThrottleMetric::Iops).unwrap(),
            2_000
        );
    }

    #[test]
    fn inactive_lanes_are_zeroed() {
        let mut harness = Harness::new(QosConfig::default());
        let key = VolumeKey::new(0, 1);
        let manager = harness.volumes.array(0).unwrap().clone();
        manager
            .set_volume_limit(3, 1, 5_000, ThrottleMetric::Bandwidth)
            .unwrap();

        harness.context.user_policy.volumes.insert(key, VolumeUserPolicy::default());
        harness.context.insert_active_volume(key);
        harness.context.set_total_connections(key, 1);
        harness.context.set_volume_connections(
            [(key, [(0u32, 1u32)].into_iter().collect())]
                .into_iter()
                .collect(),
        );
        harness
            .context
            .set_inactive_lanes([(key, vec![3u32])].into_iter().collect());
        harness.context.correction.flags.volume_throttle = true;

        run_correction(&mut harness);
        assert_eq!(
            manager
                .get_volume_limit(3, 1, ThrottleMetric::Bandwidth)
                .unwrap(),
            0
        );
    }

    #[test]
    fn pass_clears_flags_and_sticky_max_change() {
        let mut harness = Harness::new(QosConfig::default());
        harness.context.correction.flags.volume_throttle = true;
        harness.context.correction.flags.event_wrr = true;
        harness.context.set_apply_correction(true);
        harness
            .context
            .user_policy
            .volumes
            .set_max_throttling_changed(true);

        assert_eq!(run_correction(&mut harness), ManagerKind::Monitoring);
        assert!(!harness.context.correction.flags.volume_throttle);
        assert!(!harness.context.correction.flags.event_wrr);
        assert!(!harness.context.apply_correction());
        assert!(!harness.context.user_policy.volumes.max_throttling_changed());
    }
}
