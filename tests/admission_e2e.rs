//! End-to-end admission tests: token budgets with deficit carry-over,
//! queue-then-drain ordering, and conservation of the per-cycle budget.

mod common;

use proptest::prelude::*;

use common::{RecordingAdapter, TestEngine};
use volume_qos::prelude::*;

fn engine_config() -> QosConfig {
    let mut config = QosConfig::default();
    config.engine.lane_count = 2;
    config.engine.max_volume_count = 8;
    config
}

fn capped_policy(max_bandwidth: u64) -> VolumeUserPolicy {
    VolumeUserPolicy {
        max_bandwidth,
        ..VolumeUserPolicy::default()
    }
}

#[test]
fn third_io_queues_and_drains_after_replenish() {
    let engine = TestEngine::new(engine_config());
    let manager = engine.array(0);
    let adapter = RecordingAdapter::new();

    manager.volume_mounted(1, 10, capped_policy(1_000)).unwrap();

    for tag in 1..=3u64 {
        manager
            .handle_io_submission(&adapter, 0, VolumeIo::new(1, 400, tag))
            .unwrap();
    }
    assert_eq!(adapter.tags(), vec![1, 2], "200 left cannot cover 400");
    assert_eq!(manager.remaining_budget(1, ThrottleMetric::Bandwidth), 200);

    // Poller on the owner lane: replenish (200 > 0 restores the full 1000
    // quota) and drain the pending queue.
    manager.volume_qos_poller(0, &adapter, 1.0);
    assert_eq!(adapter.tags(), vec![1, 2, 3]);
    assert_eq!(manager.remaining_budget(1, ThrottleMetric::Bandwidth), 600);
}

#[test]
fn queue_drains_over_multiple_cycles_and_terminates() {
    let engine = TestEngine::new(engine_config());
    let manager = engine.array(0);
    let adapter = RecordingAdapter::new();

    manager.volume_mounted(1, 10, capped_policy(1_000)).unwrap();

    for tag in 1..=5u64 {
        manager
            .handle_io_submission(&adapter, 0, VolumeIo::new(1, 400, tag))
            .unwrap();
    }
    assert_eq!(adapter.tags(), vec![1, 2]);

    let mut drained = adapter.tags().len();
    for _ in 0..4 {
        manager.volume_qos_poller(0, &adapter, 1.0);
        let now = adapter.tags().len();
        assert!(now >= drained, "drain never regresses");
        drained = now;
    }
    assert_eq!(adapter.tags(), vec![1, 2, 3, 4, 5], "queue fully drained");

    // Further cycles are no-ops once the queue is empty.
    manager.volume_qos_poller(0, &adapter, 1.0);
    assert_eq!(adapter.tags().len(), 5);
}

#[test]
fn queued_io_preserves_submission_order() {
    let engine = TestEngine::new(engine_config());
    let manager = engine.array(0);
    let adapter = RecordingAdapter::new();

    manager.volume_mounted(1, 10, capped_policy(1_000)).unwrap();

    // A small I/O behind a blocked large one must not jump the queue.
    manager
        .handle_io_submission(&adapter, 0, VolumeIo::new(1, 900, 1))
        .unwrap();
    manager
        .handle_io_submission(&adapter, 0, VolumeIo::new(1, 900, 2))
        .unwrap();
    manager
        .handle_io_submission(&adapter, 0, VolumeIo::new(1, 10, 3))
        .unwrap();
    assert_eq!(adapter.tags(), vec![1]);

    manager.volume_qos_poller(0, &adapter, 1.0);
    assert_eq!(adapter.tags(), vec![1, 2, 3]);
}

#[test]
fn disabled_front_end_qos_passes_io_through() {
    let mut config = engine_config();
    config.engine.fe_qos_enabled = false;
    let engine = TestEngine::new(config);
    let manager = engine.array(0);
    let adapter = RecordingAdapter::new();

    // No mount, no budget; everything passes untouched.
    for tag in 1..=100u64 {
        manager
            .handle_io_submission(&adapter, 0, VolumeIo::new(1, 1 << 20, tag))
            .unwrap();
    }
    assert_eq!(adapter.tags().len(), 100);
}

proptest! {
    /// Admission conservation: each admitted I/O decrements bandwidth by its
    /// size and IOPS by one; everything after the first deferral queues.
    #[test]
    fn admission_matches_budget_model(sizes in prop::collection::vec(1u64..=600, 1..20)) {
        let engine = TestEngine::new(engine_config());
        let manager = engine.array(0);
        let adapter = RecordingAdapter::new();
        manager.volume_mounted(1, 10, capped_policy(1_000)).unwrap();

        let mut remaining: i64 = 1_000;
        let mut admitted = Vec::new();
        let mut blocked = false;
        for (tag, &size) in sizes.iter().enumerate() {
            let tag = tag as u64;
            manager
                .handle_io_submission(&adapter, 0, VolumeIo::new(1, size, tag))
                .unwrap();
            if !blocked && remaining >= size as i64 {
                remaining -= size as i64;
                admitted.push(tag);
            } else {
                blocked = true;
            }
        }

        prop_assert_eq!(adapter.tags(), admitted);
        prop_assert_eq!(manager.remaining_budget(1, ThrottleMetric::Bandwidth), remaining);
        let spent = sizes.len() as i64 - adapter.tags().len() as i64;
        prop_assert!(spent >= 0);
    }
}
