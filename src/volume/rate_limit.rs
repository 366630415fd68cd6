//! Lane-local rate limiter: signed bandwidth/IOPS counters per
//! (lane, volume) slot, reset each poll with the elapsed-time offset.
//!
//! Slots are only ever charged by the lane that owns them; resets come from
//! that same lane's poller. Atomics with relaxed ordering keep the arena
//! `Sync` without putting a lock on the admission path.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::core::types::{LaneId, VolumeId};

/// Flat lane-major arena of per-(lane, volume) remaining counters.
#[derive(Debug)]
pub struct RateLimiter {
    lane_count: u32,
    max_volume_count: u32,
    remaining_bw: Vec<AtomicI64>,
    remaining_iops: Vec<AtomicI64>,
}

impl RateLimiter {
    /// Arena sized for the fixed topology; all slots start exhausted.
    #[must_use]
    pub fn new(lane_count: u32, max_volume_count: u32) -> Self {
        let slots = (lane_count as usize) * (max_volume_count as usize);
        Self {
            lane_count,
            max_volume_count,
            remaining_bw: (0..slots).map(|_| AtomicI64::new(0)).collect(),
            remaining_iops: (0..slots).map(|_| AtomicI64::new(0)).collect(),
        }
    }

    fn slot(&self, lane: LaneId, volume: VolumeId) -> usize {
        debug_assert!(lane < self.lane_count && volume < self.max_volume_count);
        (lane as usize) * (self.max_volume_count as usize) + (volume as usize)
    }

    /// Whether either lane-local counter is exhausted.
    #[must_use]
    pub fn is_limit_exceeded(&self, lane: LaneId, volume: VolumeId) -> bool {
        let slot = self.slot(lane, volume);
        self.remaining_bw[slot].load(Ordering::Relaxed) <= 0
            || self.remaining_iops[slot].load(Ordering::Relaxed) <= 0
    }

    /// Charge one dispatched I/O against the lane-local counters.
    pub fn update(&self, lane: LaneId, volume: VolumeId, size: u64) {
        let slot = self.slot(lane, volume);
        self.remaining_bw[slot].fetch_sub(size as i64, Ordering::Relaxed);
        self.remaining_iops[slot].fetch_sub(1, Ordering::Relaxed);
    }

    /// Re-arm the lane-local counters for the next poll window. `offset`
    /// scales the per-slice limits by the fraction of a slice actually
    /// elapsed since the previous reset.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn reset(&self, lane: LaneId, volume: VolumeId, offset: f64, bw_limit: i64, iops_limit: i64) {
        let slot = self.slot(lane, volume);
        let bw = (bw_limit as f64 * offset) as i64;
        let iops = (iops_limit as f64 * offset) as i64;
        self.remaining_bw[slot].store(bw, Ordering::Relaxed);
        self.remaining_iops[slot].store(iops, Ordering::Relaxed);
    }

    /// Remaining lane-local bandwidth for one slot.
    #[must_use]
    pub fn remaining_bandwidth(&self, lane: LaneId, volume: VolumeId) -> i64 {
        self.remaining_bw[self.slot(lane, volume)].load(Ordering::Relaxed)
    }

    /// Remaining lane-local IOPS for one slot.
    #[must_use]
    pub fn remaining_iops(&self, lane: LaneId, volume: VolumeId) -> i64 {
        self.remaining_iops[self.slot(lane, volume)].load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_slots_are_exhausted() {
        let limiter = RateLimiter::new(2, 4);
        assert!(limiter.is_limit_exceeded(0, 0));
    }

    #[test]
    fn reset_then_update_charges_both_counters() {
        let limiter = RateLimiter::new(2, 4);
        limiter.reset(1, 2, 1.0, 4_096, 10);
        assert!(!limiter.is_limit_exceeded(1, 2));

        limiter.update(1, 2, 1_024);
        assert_eq!(limiter.remaining_bandwidth(1, 2), 3_072);
        assert_eq!(limiter.remaining_iops(1, 2), 9);
    }

    #[test]
    fn offset_scales_the_reset_limits() {
        let limiter = RateLimiter::new(1, 1);
        limiter.reset(0, 0, 0.5, 1_000, 100);
        assert_eq!(limiter.remaining_bandwidth(0, 0), 500);
        assert_eq!(limiter.remaining_iops(0, 0), 50);
    }

    #[test]
    fn exhaustion_on_either_counter() {
        let limiter = RateLimiter::new(1, 1);
        limiter.reset(0, 0, 1.0, 1_000_000, 1);
        limiter.update(0, 0, 10);
        assert!(
            limiter.is_limit_exceeded(0, 0),
            "iops exhaustion alone must trip the limit"
        );
    }

    #[test]
    fn slots_are_lane_independent() {
        let limiter = RateLimiter::new(2, 2);
        limiter.reset(0, 1, 1.0, 100, 100);
        limiter.reset(1, 1, 1.0, 100, 100);
        limiter.update(0, 1, 100);
        assert!(limiter.is_limit_exceeded(0, 1));
        assert!(!limiter.is_limit_exceeded(1, 1));
    }
}
