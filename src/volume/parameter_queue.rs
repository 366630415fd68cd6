//! Lane-to-monitor sample queues: each lane's poller publishes one
//! bandwidth/IOPS sample per volume per tick; Monitoring drains them on the
//! control thread and folds them into the cycle aggregate.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::core::types::{LaneId, VolumeId};

/// One tick's dispatched load for a (lane, volume) slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeSample {
    /// Bytes dispatched this tick.
    pub bandwidth: u64,
    /// I/O count dispatched this tick.
    pub iops: u64,
}

/// Flat lane-major arena of bounded sample queues.
#[derive(Debug)]
pub struct ParameterQueuePool {
    lane_count: u32,
    max_volume_count: u32,
    queues: Vec<Mutex<VecDeque<VolumeSample>>>,
}

impl ParameterQueuePool {
    /// Samples kept per slot before the oldest is dropped. Monitoring drains
    /// every cycle; the cap only matters if the control loop stalls.
    const DEPTH_LIMIT: usize = 1_024;

    /// Pre-size one queue per (lane, volume) slot.
    #[must_use]
    pub fn new(lane_count: u32, max_volume_count: u32) -> Self {
        let count = (lane_count as usize) * (max_volume_count as usize);
        Self {
            lane_count,
            max_volume_count,
            queues: (0..count).map(|_| Mutex::new(VecDeque::new())).collect(),
        }
    }

    fn queue(&self, lane: LaneId, volume: VolumeId) -> &Mutex<VecDeque<VolumeSample>> {
        debug_assert!(lane < self.lane_count && volume < self.max_volume_count);
        &self.queues[(lane as usize) * (self.max_volume_count as usize) + (volume as usize)]
    }

    /// Publish one tick's sample from a lane poller.
    pub fn push(&self, lane: LaneId, volume: VolumeId, sample: VolumeSample) {
        let mut queue = self.queue(lane, volume).lock();
        if queue.len() >= Self::DEPTH_LIMIT {
            queue.pop_front();
        }
        queue.push_back(sample);
    }

    /// Pop the oldest sample, `None` when the slot is drained.
    pub fn pop(&self, lane: LaneId, volume: VolumeId) -> Option<VolumeSample> {
        self.queue(lane, volume).lock().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_round_trips_in_order() {
        let pool = ParameterQueuePool::new(2, 4);
        pool.push(1, 3, VolumeSample { bandwidth: 100, iops: 1 });
        pool.push(1, 3, VolumeSample { bandwidth: 200, iops: 2 });

        assert_eq!(pool.pop(1, 3).map(|s| s.bandwidth), Some(100));
        assert_eq!(pool.pop(1, 3).map(|s| s.bandwidth), Some(200));
        assert!(pool.pop(1, 3).is_none());
    }

    #[test]
    fn depth_limit_drops_oldest() {
        let pool = ParameterQueuePool::new(1, 1);
        for i in 0..(ParameterQueuePool::DEPTH_LIMIT as u64 + 5) {
            pool.push(0, 0, VolumeSample { bandwidth: i, iops: i });
        }
        let first = pool.pop(0, 0).map(|s| s.bandwidth);
        assert_eq!(first, Some(5), "oldest samples beyond the cap are dropped");
    }
}
