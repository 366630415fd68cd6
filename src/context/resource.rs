//! Externally-observed resource counters refreshed once per Monitoring cycle:
//! per-array free segments and GC pressure, NVRAM stripe usage, and
//! per-backend-event CPU accounting.

#![allow(missing_docs)]

use crate::core::config::UrgencyConfig;
use crate::core::types::{ArrayId, BackendEvent, GcPressure};

// ──────────────────── per-array state ────────────────────

/// Segment-level state for one array.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceArray {
    free_segments: u32,
    gc_pressure: GcPressure,
}

impl ResourceArray {
    pub fn update(&mut self, free_segments: u32, urgency: &UrgencyConfig) {
        self.free_segments = free_segments;
        self.gc_pressure = classify_gc_pressure(free_segments, urgency);
    }

    #[must_use]
    pub const fn free_segments(&self) -> u32 {
        self.free_segments
    }

    #[must_use]
    pub const fn gc_pressure(&self) -> GcPressure {
        self.gc_pressure
    }
}

/// Free-segment count against the configured urgency ladder.
#[must_use]
pub fn classify_gc_pressure(free_segments: u32, urgency: &UrgencyConfig) -> GcPressure {
    if free_segments <= urgency.gc_critical_free_segments {
        GcPressure::Critical
    } else if free_segments <= urgency.gc_high_free_segments {
        GcPressure::High
    } else if free_segments <= urgency.gc_medium_free_segments {
        GcPressure::Medium
    } else {
        GcPressure::Normal
    }
}

// ──────────────────── NVRAM stripes ────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceNvramStripes {
    used_stripes: u32,
}

impl ResourceNvramStripes {
    pub fn set_used_stripes(&mut self, count: u32) {
        self.used_stripes = count;
    }

    #[must_use]
    pub const fn used_stripes(&self) -> u32 {
        self.used_stripes
    }
}

// ──────────────────── event CPU accounting ────────────────────

/// Per-backend-event pending and lifetime-generated counts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceCpu {
    pending: [u32; BackendEvent::COUNT],
    generated: [u64; BackendEvent::COUNT],
}

impl ResourceCpu {
    pub fn set_pending(&mut self, event: BackendEvent, count: u32) {
        self.pending[event.index()] = count;
    }

    #[must_use]
    pub const fn pending(&self, event: BackendEvent) -> u32 {
        self.pending[event.index()]
    }

    pub fn set_generated(&mut self, event: BackendEvent, count: u64) {
        self.generated[event.index()] = count;
    }

    #[must_use]
    pub const fn generated(&self, event: BackendEvent) -> u64 {
        self.generated[event.index()]
    }
}

// ──────────────────── combined view ────────────────────

/// All resource counters, indexed by array where applicable.
#[derive(Debug, Clone, Default)]
pub struct QosResource {
    arrays: Vec<ResourceArray>,
    pub nvram: ResourceNvramStripes,
    pub cpu: ResourceCpu,
}

impl QosResource {
    #[must_use]
    pub fn new(array_count: u32) -> Self {
        Self {
            arrays: vec![ResourceArray::default(); array_count as usize],
            nvram: ResourceNvramStripes::default(),
            cpu: ResourceCpu::default(),
        }
    }

    pub fn reset(&mut self) {
        let count = self.arrays.len();
        self.arrays = vec![ResourceArray::default(); count];
        self.nvram = ResourceNvramStripes::default();
        self.cpu = ResourceCpu::default();
    }

    #[must_use]
    pub fn array(&self, array_id: ArrayId) -> Option<&ResourceArray> {
        self.arrays.get(array_id as usize)
    }

    pub fn array_mut(&mut self, array_id: ArrayId) -> Option<&mut ResourceArray> {
        self.arrays.get_mut(array_id as usize)
    }

    /// The array under the most GC pressure; ties broken by lowest array id.
    #[must_use]
    pub fn most_pressured_array(&self) -> Option<&ResourceArray> {
        self.arrays.iter().rev().max_by_key(|a| a.gc_pressure())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urgency() -> UrgencyConfig {
        UrgencyConfig {
            gc_medium_free_segments: 120,
            gc_high_free_segments: 60,
            gc_critical_free_segments: 20,
            stripe_high_watermark: 1_000,
        }
    }

    #[test]
    fn gc_pressure_ladder_boundaries() {
        let u = urgency();
        assert_eq!(classify_gc_pressure(121, &u), GcPressure::Normal);
        assert_eq!(classify_gc_pressure(120, &u), GcPressure::Medium);
        assert_eq!(classify_gc_pressure(61, &u), GcPressure::Medium);
        assert_eq!(classify_gc_pressure(60, &u), GcPressure::High);
        assert_eq!(classify_gc_pressure(21, &u), GcPressure::High);
        assert_eq!(classify_gc_pressure(20, &u), GcPressure::Critical);
        assert_eq!(classify_gc_pressure(0, &u), GcPressure::Critical);
    }

    #[test]
    fn most_pressured_array_wins() {
        let mut resource = QosResource::new(3);
        let u = urgency();
        resource.array_mut(0).unwrap().update(200, &u);
        resource.array_mut(1).unwrap().update(15, &u);
        resource.array_mut(2).unwrap().update(100, &u);

        let worst = resource.most_pressured_array().unwrap();
        assert_eq!(worst.gc_pressure(), GcPressure::Critical);
        assert_eq!(worst.free_segments(), 15);
    }

    #[test]
    fn reset_preserves_array_count() {
        let mut resource = QosResource::new(2);
        resource.nvram.set_used_stripes(500);
        resource.cpu.set_pending(BackendEvent::Flush, 9);
        resource.reset();
        assert!(resource.array(1).is_some());
        assert_eq!(resource.nvram.used_stripes(), 0);
        assert_eq!(resource.cpu.pending(BackendEvent::Flush), 0);
    }
}
