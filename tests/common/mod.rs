//! Shared in-memory fakes for the bridge seams, used by the integration
//! tests in place of the NVMe-oF transport, backend scheduler, and array
//! metadata.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use parking_lot::Mutex;

use volume_qos::prelude::*;

// ──────────────────── submission ────────────────────

/// Records the tag of every admitted I/O in dispatch order.
#[derive(Default)]
pub struct RecordingAdapter {
    tags: Mutex<Vec<u64>>,
}

impl RecordingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tags(&self) -> Vec<u64> {
        self.tags.lock().clone()
    }
}

impl SubmissionAdapter for RecordingAdapter {
    fn submit(&self, io: VolumeIo) {
        self.tags.lock().push(io.tag);
    }
}

// ──────────────────── lane topology ────────────────────

/// Every caller sits on lane 0, which is also the owner lane, so lifecycle
/// commands run inline.
pub struct OwnerLane;

impl LaneLocator for OwnerLane {
    fn current_lane(&self) -> Option<LaneId> {
        Some(0)
    }

    fn first_lane(&self) -> LaneId {
        0
    }
}

/// Routes every subsystem to every lane with one connection each.
pub struct EveryLane;

impl LaneRouter for EveryLane {
    fn subsystem_on_lane(&self, _lane: LaneId, _nqn: NqnId) -> bool {
        true
    }

    fn connection_count(&self, _lane: LaneId, _nqn: NqnId) -> u32 {
        1
    }
}

// ──────────────────── backend scheduler ────────────────────

/// WRR weight store backed by a map; unset events report the default.
pub struct StubScheduler {
    weights: Mutex<HashMap<usize, i32>>,
    default: i32,
}

impl StubScheduler {
    pub fn new(default: i32) -> Self {
        Self {
            weights: Mutex::new(HashMap::new()),
            default,
        }
    }
}

impl EventScheduler for StubScheduler {
    fn set_wrr_weight(&self, event: BackendEvent, weight: i32) {
        self.weights.lock().insert(event.index(), weight);
    }

    fn wrr_weight(&self, event: BackendEvent) -> i32 {
        self.weights
            .lock()
            .get(&event.index())
            .copied()
            .unwrap_or(self.default)
    }
}

// ──────────────────── resource counters ────────────────────

/// Mutable resource counters the tests steer between control-loop cycles.
#[derive(Default)]
pub struct StubResources {
    free_segments: Mutex<HashMap<ArrayId, u32>>,
    nvram_stripes: Mutex<HashMap<ArrayId, u32>>,
    bandwidth: Mutex<HashMap<usize, VecDeque<u64>>>,
}

impl StubResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_free_segments(&self, array: ArrayId, free: u32) {
        self.free_segments.lock().insert(array, free);
    }

    pub fn set_nvram_stripes(&self, array: ArrayId, used: u32) {
        self.nvram_stripes.lock().insert(array, used);
    }

    pub fn push_bandwidth(&self, event: BackendEvent, sample: u64) {
        self.bandwidth
            .lock()
            .entry(event.index())
            .or_default()
            .push_back(sample);
    }
}

impl ResourceSource for StubResources {
    fn free_segments(&self, array: ArrayId) -> u32 {
        self.free_segments
            .lock()
            .get(&array)
            .copied()
            .unwrap_or(u32::MAX)
    }

    fn used_nvram_stripes(&self, array: ArrayId) -> u32 {
        self.nvram_stripes.lock().get(&array).copied().unwrap_or(0)
    }

    fn pending_backend_io(&self, _event: BackendEvent) -> u32 {
        0
    }

    fn generated_backend_io(&self, _event: BackendEvent) -> u64 {
        0
    }

    fn poll_event_bandwidth(&self, event: BackendEvent) -> Option<u64> {
        self.bandwidth.lock().get_mut(&event.index())?.pop_front()
    }
}

// ──────────────────── engine wiring ────────────────────

/// Fully-wired engine over the fakes: one context, one volume-manager set
/// sharing its barrier, and handles the tests keep steering through.
pub struct TestEngine {
    pub config: QosConfig,
    pub volumes: Arc<QosVolumeManagerSet>,
    pub scheduler: Arc<StubScheduler>,
    pub resources: Arc<StubResources>,
    pub exit: Arc<AtomicBool>,
    context: Option<QosContext>,
}

impl TestEngine {
    pub fn new(config: QosConfig) -> Self {
        let context = QosContext::new(&config);
        let exit = Arc::new(AtomicBool::new(false));
        let volumes = Arc::new(QosVolumeManagerSet::new(
            &config,
            Arc::new(OwnerLane),
            Arc::new(EveryLane),
            context.barrier(),
            Arc::clone(&exit),
        ));
        let scheduler = Arc::new(StubScheduler::new(config.wrr.default_weight));
        Self {
            config,
            volumes,
            scheduler,
            resources: Arc::new(StubResources::new()),
            exit,
            context: Some(context),
        }
    }

    /// Consume the engine's context into a control loop over the same
    /// manager set. Call at most once.
    pub fn control_loop(&mut self) -> ControlLoop {
        let context = self
            .context
            .take()
            .expect("control_loop may only be built once");
        ControlLoop::new(
            self.config.clone(),
            context,
            Arc::clone(&self.volumes),
            Arc::clone(&self.scheduler) as Arc<dyn EventScheduler>,
            Arc::clone(&self.resources) as Arc<dyn ResourceSource>,
            Arc::new(EveryLane),
            Arc::clone(&self.exit),
        )
    }

    pub fn array(&self, array: ArrayId) -> Arc<QosVolumeManager> {
        Arc::clone(self.volumes.array(array).expect("array in range"))
    }
}
