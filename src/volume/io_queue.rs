//! Per-(lane, volume) pending I/O FIFOs for throttled submissions.
//!
//! Each slot holds its own mutex so lanes never contend with each other;
//! within a slot the lock covers only a push or pop, never a call into the
//! submission adapter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::core::types::{LaneId, VolumeId, VolumeIo};

#[derive(Debug, Default)]
struct Slot {
    queue: Mutex<VecDeque<VolumeIo>>,
    pending: AtomicU64,
}

/// Flat lane-major arena of pending queues.
#[derive(Debug)]
pub struct IoQueuePool {
    lane_count: u32,
    max_volume_count: u32,
    slots: Vec<Slot>,
}

impl IoQueuePool {
    /// Pre-size one FIFO per (lane, volume) slot.
    #[must_use]
    pub fn new(lane_count: u32, max_volume_count: u32) -> Self {
        let count = (lane_count as usize) * (max_volume_count as usize);
        Self {
            lane_count,
            max_volume_count,
            slots: (0..count).map(|_| Slot::default()).collect(),
        }
    }

    fn slot(&self, lane: LaneId, volume: VolumeId) -> &Slot {
        debug_assert!(lane < self.lane_count && volume < self.max_volume_count);
        &self.slots[(lane as usize) * (self.max_volume_count as usize) + (volume as usize)]
    }

    /// Append one throttled I/O to the tail of the slot's FIFO.
    pub fn enqueue(&self, lane: LaneId, volume: VolumeId, io: VolumeIo) {
        let slot = self.slot(lane, volume);
        slot.queue.lock().push_back(io);
        slot.pending.fetch_add(1, Ordering::Relaxed);
    }

    /// Pop the oldest pending I/O, if any.
    pub fn dequeue(&self, lane: LaneId, volume: VolumeId) -> Option<VolumeIo> {
        self.dequeue_if(lane, volume, |_| true)
    }

    /// Pop the oldest pending I/O only when `admit` accepts it; the head
    /// stays queued otherwise. The lock covers the peek and the pop so a
    /// concurrent drainer cannot steal the inspected head.
    pub fn dequeue_if(
        &self,
        lane: LaneId,
        volume: VolumeId,
        admit: impl FnOnce(&VolumeIo) -> bool,
    ) -> Option<VolumeIo> {
        let slot = self.slot(lane, volume);
        let mut queue = slot.queue.lock();
        if !admit(queue.front()?) {
            return None;
        }
        let io = queue.pop_front();
        drop(queue);
        if io.is_some() {
            slot.pending.fetch_sub(1, Ordering::Relaxed);
        }
        io
    }

    /// Pending count for one slot; racy by nature, good enough for the
    /// empty-queue admission check.
    #[must_use]
    pub fn pending(&self, lane: LaneId, volume: VolumeId) -> u64 {
        self.slot(lane, volume).pending.load(Ordering::Relaxed)
    }

    /// Whether the slot has no queued I/O right now.
    #[must_use]
    pub fn is_empty(&self, lane: LaneId, volume: VolumeId) -> bool {
        self.pending(lane, volume) == 0
    }
}
