//! End-to-end control-loop tests: the Monitor → Policy → Correction walk
//! over live GC pressure, rebuild policy, and volume limit pushes, plus the
//! WRR clamp invariant.

mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use proptest::prelude::*;

use common::{EveryLane, RecordingAdapter, StubResources, StubScheduler, TestEngine};
use volume_qos::context::correction::WeightDirective;
use volume_qos::core::types::preset;
use volume_qos::manager::{ManagerDeps, QosCorrectionManager};
use volume_qos::prelude::*;

fn engine_config() -> QosConfig {
    let mut config = QosConfig::default();
    config.engine.lane_count = 2;
    config.engine.max_volume_count = 8;
    // Headroom above the default so mid-range weights are not pre-clamped.
    config.wrr.max_positive_weight = 100;
    config
}

#[test]
fn gc_pressure_cycle_retunes_gc_and_flush_weights() {
    let mut engine = TestEngine::new(engine_config());
    engine.resources.set_free_segments(0, 200);
    engine
        .scheduler
        .set_wrr_weight(BackendEvent::GarbageCollection, 50);
    engine.scheduler.set_wrr_weight(BackendEvent::Flush, 50);
    let mut control = engine.control_loop();

    // Calm cycle: records the 200-free-segment snapshot, no correction.
    assert_eq!(control.run_cycle(), ManagerKind::Monitoring);
    assert_eq!(control.run_cycle(), ManagerKind::Policy);
    assert_eq!(control.active_kind(), ManagerKind::Monitoring);

    // Free segments collapse to critical while shrinking.
    engine.resources.set_free_segments(0, 10);
    assert_eq!(control.run_cycle(), ManagerKind::Monitoring);
    assert_eq!(control.run_cycle(), ManagerKind::Policy);
    assert_eq!(control.active_kind(), ManagerKind::Correction);
    assert_eq!(control.run_cycle(), ManagerKind::Correction);

    // unit step 2: flush promoted by Increase4X (50 - 10*2), GC backed off
    // by Decrease4X (50 + 4*2).
    assert_eq!(engine.scheduler.wrr_weight(BackendEvent::Flush), 30);
    assert_eq!(
        engine.scheduler.wrr_weight(BackendEvent::GarbageCollection),
        58
    );
    assert_eq!(control.active_kind(), ManagerKind::Monitoring);
}

#[test]
fn gc_recovery_resets_backend_weights_to_default() {
    let mut engine = TestEngine::new(engine_config());
    engine.resources.set_free_segments(0, 200);
    let mut control = engine.control_loop();
    control.run_cycle();
    control.run_cycle();

    engine.resources.set_free_segments(0, 10);
    control.run_cycle();
    control.run_cycle();
    control.run_cycle();
    let tightened = engine.scheduler.wrr_weight(BackendEvent::Flush);
    assert_ne!(tightened, engine.config.wrr.default_weight);

    // Pressure clears: the whole backend group returns to the default.
    engine.resources.set_free_segments(0, 100_000);
    control.run_cycle();
    control.run_cycle();
    control.run_cycle();
    for event in [
        BackendEvent::GarbageCollection,
        BackendEvent::Flush,
        BackendEvent::UserdataRebuild,
        BackendEvent::MetadataRebuild,
    ] {
        assert_eq!(
            engine.scheduler.wrr_weight(event),
            engine.config.wrr.default_weight
        );
    }
}

#[test]
fn rebuild_impact_change_jumps_rebuild_weight_to_preset() {
    let mut engine = TestEngine::new(engine_config());
    let manager = engine.array(0);
    let mut control = engine.control_loop();

    manager.update_rebuild_impact(RebuildImpact::Low);
    control.run_cycle();
    control.run_cycle();
    control.run_cycle();
    assert_eq!(
        engine.scheduler.wrr_weight(BackendEvent::UserdataRebuild),
        preset::PRIO_WT_LOW
    );

    manager.update_rebuild_impact(RebuildImpact::Highest);
    control.run_cycle();
    control.run_cycle();
    control.run_cycle();
    assert_eq!(
        engine.scheduler.wrr_weight(BackendEvent::UserdataRebuild),
        preset::PRIO_WT_HIGHEST
    );
}

#[test]
fn max_policy_push_distributes_limits_by_connection_share() {
    let mut engine = TestEngine::new(engine_config());
    let manager = engine.array(0);
    let adapter = RecordingAdapter::new();

    let policy = VolumeUserPolicy {
        max_bandwidth: 100_000,
        ..VolumeUserPolicy::default()
    };
    manager.volume_mounted(1, 10, policy).unwrap();
    manager
        .handle_io_submission(&adapter, 0, VolumeIo::new(1, 4_096, 1))
        .unwrap();
    manager.volume_qos_poller(0, &adapter, 1.0);
    manager.volume_qos_poller(1, &adapter, 1.0);

    let mut control = engine.control_loop();
    assert_eq!(control.run_cycle(), ManagerKind::Monitoring);
    assert_eq!(control.run_cycle(), ManagerKind::Policy);
    assert_eq!(control.run_cycle(), ManagerKind::Correction);

    // Two lanes, one connection each: the 100_000 max splits evenly.
    for lane in 0..2 {
        assert_eq!(
            manager
                .get_volume_limit(lane, 1, ThrottleMetric::Bandwidth)
                .unwrap(),
            50_000
        );
    }
}

// ──────────────────── correction-pass invariants ────────────────────

fn apply_one_directive(directive: WeightDirective, start: i32) -> i32 {
    let config = engine_config();
    let mut context = QosContext::new(&config);
    let exit = Arc::new(AtomicBool::new(false));
    let volumes = QosVolumeManagerSet::new(
        &config,
        Arc::new(common::OwnerLane),
        Arc::new(EveryLane),
        context.barrier(),
        Arc::clone(&exit),
    );
    let scheduler = StubScheduler::new(config.wrr.default_weight);
    scheduler.set_wrr_weight(BackendEvent::GarbageCollection, start);
    let resources = StubResources::new();
    let mut log = DecisionLog::disabled();

    context.correction.flags.event_wrr = true;
    context
        .correction
        .event_wrr
        .set_directive(BackendEvent::GarbageCollection, directive);

    let mut deps = ManagerDeps {
        config: &config,
        context: &mut context,
        volumes: &volumes,
        scheduler: &scheduler,
        resources: &resources,
        router: &EveryLane,
        log: &mut log,
        exit: &exit,
    };
    QosCorrectionManager::new().execute(&mut deps);
    scheduler.wrr_weight(BackendEvent::GarbageCollection)
}

#[test]
fn reset_directive_is_idempotent_and_consumed() {
    let config = engine_config();
    let first = apply_one_directive(WeightDirective::Reset, -900);
    assert_eq!(first, config.wrr.default_weight);
    let second = apply_one_directive(WeightDirective::Reset, first);
    assert_eq!(second, first, "resetting twice equals resetting once");
}

fn arb_directive() -> impl Strategy<Value = WeightDirective> {
    proptest::sample::select(vec![
        WeightDirective::Increase,
        WeightDirective::Increase2X,
        WeightDirective::Increase4X,
        WeightDirective::Decrease,
        WeightDirective::Decrease2X,
        WeightDirective::Decrease4X,
        WeightDirective::PriorityHighest,
        WeightDirective::PriorityHigher,
        WeightDirective::PriorityHigh,
        WeightDirective::PriorityMedium,
        WeightDirective::PriorityLow,
        WeightDirective::PriorityLower,
        WeightDirective::PriorityLowest,
        WeightDirective::Reset,
    ])
}

proptest! {
    /// One application of any directive from any in-range weight lands
    /// inside the configured clamp bounds.
    #[test]
    fn applied_weight_stays_in_bounds(
        directive in arb_directive(),
        start in -1_000i32..=100,
    ) {
        let config = engine_config();
        let weight = apply_one_directive(directive, start);
        prop_assert!(weight >= config.wrr.max_negative_weight);
        prop_assert!(weight <= config.wrr.max_positive_weight);
    }
}
