//! Policy pass: turns the context gathered by Monitoring into correction
//! directives, then decides whether Correction runs this cycle.

use crate::context::correction::{ThrottleDirective, WeightDirective};
use crate::context::{PolicySnapshot, VolumeKey};
use crate::core::types::{BackendEvent, GcPressure, RebuildImpact};
use crate::logger::jsonl::{EventType, LogEntry, Severity};

use super::{ManagerDeps, ManagerKind};

/// Second stage of the control loop. Stateless; last-cycle observations it
/// diffs against live in the context's [`PolicySnapshot`].
#[derive(Debug, Default)]
pub struct QosPolicyManager;

impl QosPolicyManager {
    /// A fresh pass; carries no state of its own.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// One policy pass. Hands off to Correction when any corrective action
    /// is due, otherwise back to Monitoring.
    pub fn execute(&mut self, deps: &mut ManagerDeps<'_>) -> ManagerKind {
        deps.context.correction.clear_flags();
        deps.context.set_apply_correction(false);

        if deps.config.engine.fe_qos_enabled {
            self.evaluate_volume_policy(deps);
        }
        self.evaluate_event_policy(deps);
        self.store_snapshot(deps);
        deps.context.increment_correction_cycle();

        if deps.context.apply_correction() {
            ManagerKind::Correction
        } else {
            ManagerKind::Monitoring
        }
    }

    // ──────────────────── volume throttling ────────────────────

    fn evaluate_volume_policy(&self, deps: &mut ManagerDeps<'_>) {
        if self.throttle_setup_changed(deps) {
            deps.context.correction.flags.volume_throttle = true;
            deps.context.set_apply_correction(true);
            return;
        }

        // Write-buffer pressure overrides the cadence gate: push limits now.
        let stripes = deps.context.resource.nvram.used_stripes();
        if stripes > deps.config.urgency.stripe_high_watermark {
            deps.context.correction.flags.volume_throttle = true;
            deps.context.set_apply_correction(true);
            return;
        }

        let Some(min_volume) = deps.context.user_policy.volumes.minimum_guarantee_volume()
        else {
            return;
        };

        if !deps.context.is_correction_cycle_over() {
            deps.context.set_apply_correction(false);
            deps.context.correction.flags.volume_throttle = true;
            return;
        }

        self.evaluate_min_guarantee_band(deps, min_volume);
    }

    /// The four structural triggers that force a full limit re-push: minimum
    /// guarantee disabled, minimum volume switched, any max limit changed,
    /// or the active (lane, volume) topology changed.
    fn throttle_setup_changed(&self, deps: &ManagerDeps<'_>) -> bool {
        let volumes = &deps.context.user_policy.volumes;
        let snapshot = &deps.context.snapshot;

        if snapshot.min_policy_in_effect && !volumes.min_policy_in_effect() {
            return true;
        }
        if volumes.minimum_guarantee_volume() != snapshot.minimum_guarantee_volume {
            return true;
        }
        if volumes.max_throttling_changed() {
            return true;
        }
        *deps.context.active_lane_volumes() != snapshot.lane_volumes
    }

    /// Once per correction cycle: compare the minimum-guarantee volume's
    /// measured load against its target. Below target, every other volume is
    /// throttled down; above the upper band, they are given headroom back.
    fn evaluate_min_guarantee_band(&self, deps: &mut ManagerDeps<'_>, min_volume: VolumeKey) {
        let volumes = &deps.context.user_policy.volumes;
        let Some(policy) = volumes.get(min_volume).copied() else {
            return;
        };
        if !deps.context.parameters.volume_exists(min_volume) {
            return;
        }

        // A cycle where any active volume shows no traffic is unusable for
        // the average comparison.
        for &key in deps.context.active_volumes() {
            match deps.context.parameters.volume(key) {
                Some(param) if param.bandwidth() > 0 && param.iops() > 0 => {}
                _ => return,
            }
        }
        let Some(measured) = deps.context.parameters.volume(min_volume) else {
            return;
        };

        let (average, target) = if volumes.min_policy_is_bandwidth() {
            (measured.bandwidth(), policy.min_bandwidth)
        } else {
            (measured.iops(), policy.min_iops)
        };
        if target == 0 {
            return;
        }

        let upper = target.saturating_mul(deps.config.throttle.upper_threshold_pct) / 100;
        let directive = if average < target {
            deps.context.set_apply_correction(true);
            ThrottleDirective::Increase
        } else if average > upper {
            deps.context.set_apply_correction(true);
            ThrottleDirective::Decrease
        } else {
            deps.context.set_apply_correction(false);
            ThrottleDirective::NoChange
        };
        deps.context
            .correction
            .volume_throttle
            .mark_all(directive, Some(min_volume));
        deps.context.correction.flags.volume_throttle = true;
    }

    // ──────────────────── event weights ────────────────────

    fn evaluate_event_policy(&self, deps: &mut ManagerDeps<'_>) {
        self.evaluate_rebuild_impact(deps);
        self.evaluate_gc_pressure(deps);
    }

    /// Map a changed rebuild-impact policy onto a priority directive for the
    /// userdata rebuild event.
    fn evaluate_rebuild_impact(&self, deps: &mut ManagerDeps<'_>) {
        if !deps.context.user_policy.rebuild.policy_changed() {
            return;
        }
        let impact = deps.context.user_policy.rebuild.strongest_impact();
        let directive = match impact {
            RebuildImpact::Highest => WeightDirective::PriorityHighest,
            RebuildImpact::Higher => WeightDirective::PriorityHigher,
            RebuildImpact::High => WeightDirective::PriorityHigh,
            RebuildImpact::Medium => WeightDirective::PriorityMedium,
            RebuildImpact::Low => WeightDirective::PriorityLow,
            RebuildImpact::Lower => WeightDirective::PriorityLower,
            RebuildImpact::Lowest => WeightDirective::PriorityLowest,
        };
        deps.context
            .correction
            .event_wrr
            .set_directive(BackendEvent::UserdataRebuild, directive);
        deps.context.user_policy.rebuild.clear_policy_changed();
        deps.context.correction.flags.event_wrr = true;
        deps.context.set_apply_correction(true);
    }

    /// GC free-segment ladder against the previous cycle's snapshot. Under
    /// worsening pressure the flush event is promoted (it frees segments)
    /// while GC backs off one notch; a return to Normal resets the whole
    /// backend group to defaults.
    fn evaluate_gc_pressure(&self, deps: &mut ManagerDeps<'_>) {
        let Some(worst) = deps.context.resource.most_pressured_array() else {
            return;
        };
        let pressure = worst.gc_pressure();
        let free_segments = worst.free_segments();
        let previous = deps.context.snapshot.gc_pressure;

        if pressure == GcPressure::Normal && previous == GcPressure::Normal {
            return;
        }
        if pressure != previous {
            let mut entry = LogEntry::new(EventType::GcPressureChange, Severity::Info);
            entry.details = Some(format!("{previous:?} -> {pressure:?}, {free_segments} free"));
            deps.log.write(&entry);
        }
        let shrinking = free_segments < deps.context.snapshot.free_segments;

        let pair = match pressure {
            GcPressure::Normal => {
                let wrr = &mut deps.context.correction.event_wrr;
                wrr.set_directive(BackendEvent::GarbageCollection, WeightDirective::Reset);
                wrr.set_directive(BackendEvent::Flush, WeightDirective::Reset);
                wrr.set_directive(BackendEvent::UserdataRebuild, WeightDirective::Reset);
                wrr.set_directive(BackendEvent::MetadataRebuild, WeightDirective::Reset);
                deps.context.correction.flags.event_wrr = true;
                deps.context.set_apply_correction(true);
                return;
            }
            GcPressure::Medium if shrinking => {
                Some((WeightDirective::Decrease, WeightDirective::Increase))
            }
            GcPressure::High if shrinking => {
                Some((WeightDirective::Decrease2X, WeightDirective::Increase2X))
            }
            GcPressure::Critical if shrinking => {
                Some((WeightDirective::Decrease4X, WeightDirective::Increase4X))
            }
            _ => None,
        };

        if let Some((gc, flush)) = pair {
            let wrr = &mut deps.context.correction.event_wrr;
            wrr.set_directive(BackendEvent::GarbageCollection, gc);
            wrr.set_directive(BackendEvent::Flush, flush);
            deps.context.correction.flags.event_wrr = true;
            deps.context.set_apply_correction(true);
        }
    }

    // ──────────────────── snapshot ────────────────────

    fn store_snapshot(&self, deps: &mut ManagerDeps<'_>) {
        let volumes = &deps.context.user_policy.volumes;
        let (gc_pressure, free_segments) = deps
            .context
            .resource
            .most_pressured_array()
            .map_or((GcPressure::Normal, 0), |a| {
                (a.gc_pressure(), a.free_segments())
            });
        deps.context.snapshot = PolicySnapshot {
            min_policy_in_effect: volumes.min_policy_in_effect(),
            minimum_guarantee_volume: volumes.minimum_guarantee_volume(),
            lane_volumes: deps.context.active_lane_volumes().clone(),
            gc_pressure,
            free_segments,
        };
    }
}
