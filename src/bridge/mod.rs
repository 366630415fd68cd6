//! Boundary traits toward the rest of the storage engine.
//!
//! The QoS engine never owns the NVMe-oF transport, the backend event
//! scheduler, or the array metadata; it pulls what it needs through these
//! seams. Production wires them to the real subsystems, tests substitute
//! in-memory fakes.

use crate::context::user_policy::VolumeUserPolicy;
use crate::core::types::{ArrayId, BackendEvent, LaneId, NqnId, RebuildImpact, VolumeId, VolumeIo};

/// Hands an admitted I/O to the downstream submission path.
///
/// Called on the lane's own thread, both from the admission fast path and
/// from the poller's drain loop. Implementations must not block.
pub trait SubmissionAdapter: Send + Sync {
    /// Dispatch one admitted I/O.
    fn submit(&self, io: VolumeIo);
}

/// Read/write access to the backend scheduler's per-event WRR weights.
///
/// Lower weight means the event is serviced more often.
pub trait EventScheduler: Send + Sync {
    /// Install a new weight for one backend event type.
    fn set_wrr_weight(&self, event: BackendEvent, weight: i32);
    /// Current weight for one backend event type.
    fn wrr_weight(&self, event: BackendEvent) -> i32;
}

/// Source of externally-managed per-volume user policy and rebuild priority.
pub trait PolicySource: Send + Sync {
    /// Whether the array's policy map changed since the last snapshot.
    /// Reading does not clear the flag; `clear_policy_dirty` does.
    fn policy_dirty(&self, array: ArrayId) -> bool;
    /// Acknowledge the dirty flag after taking a snapshot.
    fn clear_policy_dirty(&self, array: ArrayId);
    /// Current mounted-volume policy map for one array.
    fn volume_policies(&self, array: ArrayId) -> Vec<(VolumeId, VolumeUserPolicy)>;
    /// Operator-selected rebuild impact for one array.
    fn rebuild_impact(&self, array: ArrayId) -> RebuildImpact;
}

/// Source of array resource counters sampled once per monitoring pass.
pub trait ResourceSource: Send + Sync {
    /// Free segment count for one array.
    fn free_segments(&self, array: ArrayId) -> u32;
    /// NVRAM write-buffer stripes currently in use for one array.
    fn used_nvram_stripes(&self, array: ArrayId) -> u32;
    /// Backend I/Os of one event type currently pending in the scheduler.
    fn pending_backend_io(&self, event: BackendEvent) -> u32;
    /// Lifetime count of backend I/Os generated for one event type.
    fn generated_backend_io(&self, event: BackendEvent) -> u64;
    /// Pop one bandwidth sample for a backend event, `None` when drained.
    fn poll_event_bandwidth(&self, event: BackendEvent) -> Option<u64>;
}

/// Maps NVMe subsystems to the lanes their connections are pinned on.
pub trait LaneRouter: Send + Sync {
    /// Whether the subsystem has at least one connection on this lane.
    fn subsystem_on_lane(&self, lane: LaneId, nqn: NqnId) -> bool;
    /// Connection count for a subsystem on this lane.
    fn connection_count(&self, lane: LaneId, nqn: NqnId) -> u32;
}

/// Identifies the calling thread's lane, if any.
pub trait LaneLocator: Send + Sync {
    /// Lane bound to the calling thread, `None` off the I/O path.
    fn current_lane(&self) -> Option<LaneId>;
    /// The designated owner lane for volume lifecycle operations.
    fn first_lane(&self) -> LaneId;
}
