//! Correction directives produced by Policy and consumed by Correction:
//! which correction classes fire this cycle, per-event WRR weight directives,
//! and per-volume throttle directives.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::context::VolumeKey;
use crate::core::types::BackendEvent;

// ──────────────────── weight directives ────────────────────

/// Directive applied to one backend event's WRR weight. Relative directives
/// scale the configured unit step; priority directives jump to a preset.
/// Lower weight means the event is serviced more often, so Increase variants
/// subtract from the weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightDirective {
    NoChange,
    Increase,
    Increase2X,
    Increase4X,
    Decrease,
    Decrease2X,
    Decrease4X,
    PriorityHighest,
    PriorityHigher,
    PriorityHigh,
    PriorityMedium,
    PriorityLow,
    PriorityLower,
    PriorityLowest,
    Reset,
}

impl fmt::Display for WeightDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoChange => "no_change",
            Self::Increase => "increase",
            Self::Increase2X => "increase_2x",
            Self::Increase4X => "increase_4x",
            Self::Decrease => "decrease",
            Self::Decrease2X => "decrease_2x",
            Self::Decrease4X => "decrease_4x",
            Self::PriorityHighest => "priority_highest",
            Self::PriorityHigher => "priority_higher",
            Self::PriorityHigh => "priority_high",
            Self::PriorityMedium => "priority_medium",
            Self::PriorityLow => "priority_low",
            Self::PriorityLower => "priority_lower",
            Self::PriorityLowest => "priority_lowest",
            Self::Reset => "reset",
        };
        write!(f, "{name}")
    }
}

/// Per-event directive store plus the mirrored last-applied weight, which
/// gives the next cycle's reset check a baseline.
#[derive(Debug, Clone)]
pub struct EventWrrWeight {
    directives: [WeightDirective; BackendEvent::COUNT],
    weights: [i32; BackendEvent::COUNT],
}

impl EventWrrWeight {
    #[must_use]
    pub fn new(default_weight: i32) -> Self {
        Self {
            directives: [WeightDirective::NoChange; BackendEvent::COUNT],
            weights: [default_weight; BackendEvent::COUNT],
        }
    }

    pub fn reset(&mut self, default_weight: i32) {
        *self = Self::new(default_weight);
    }

    pub fn set_directive(&mut self, event: BackendEvent, directive: WeightDirective) {
        self.directives[event.index()] = directive;
    }

    #[must_use]
    pub const fn directive(&self, event: BackendEvent) -> WeightDirective {
        self.directives[event.index()]
    }

    /// Read and consume the directive; the store returns to `NoChange` so a
    /// stale directive can never be applied twice.
    pub fn take_directive(&mut self, event: BackendEvent) -> WeightDirective {
        std::mem::replace(&mut self.directives[event.index()], WeightDirective::NoChange)
    }

    pub fn set_weight(&mut self, event: BackendEvent, weight: i32) {
        self.weights[event.index()] = weight;
    }

    #[must_use]
    pub const fn weight(&self, event: BackendEvent) -> i32 {
        self.weights[event.index()]
    }
}

// ──────────────────── volume throttle directives ────────────────────

/// Direction of a per-volume throttle adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleDirective {
    NoChange,
    Increase,
    Decrease,
}

/// One volume's throttle directive for this cycle.
#[derive(Debug, Clone, Copy)]
pub struct VolumeThrottle {
    pub directive: ThrottleDirective,
    pub reset_flag: bool,
}

impl Default for VolumeThrottle {
    fn default() -> Self {
        Self {
            directive: ThrottleDirective::NoChange,
            reset_flag: false,
        }
    }
}

/// Throttle directives for every volume Monitoring saw this cycle.
#[derive(Debug, Clone, Default)]
pub struct AllVolumeThrottle {
    throttles: HashMap<VolumeKey, VolumeThrottle>,
}

impl AllVolumeThrottle {
    pub fn reset(&mut self) {
        self.throttles.clear();
    }

    pub fn insert(&mut self, key: VolumeKey) {
        self.throttles.entry(key).or_default();
    }

    pub fn mark_all(&mut self, directive: ThrottleDirective, skip: Option<VolumeKey>) {
        for (key, throttle) in &mut self.throttles {
            if Some(*key) == skip {
                continue;
            }
            throttle.directive = directive;
            throttle.reset_flag = true;
        }
    }

    #[must_use]
    pub fn get(&self, key: VolumeKey) -> Option<&VolumeThrottle> {
        self.throttles.get(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VolumeKey, &VolumeThrottle)> {
        self.throttles.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.throttles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.throttles.is_empty()
    }
}

// ──────────────────── correction classes ────────────────────

/// Which corrective actions are needed this cycle. Written by Policy, read
/// and cleared by Correction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrectionFlags {
    pub volume_throttle: bool,
    pub event_wrr: bool,
    pub event_throttle: bool,
}

/// Full correction directive block inside the context.
#[derive(Debug, Clone)]
pub struct QosCorrection {
    pub flags: CorrectionFlags,
    pub event_wrr: EventWrrWeight,
    pub volume_throttle: AllVolumeThrottle,
}

impl QosCorrection {
    #[must_use]
    pub fn new(default_weight: i32) -> Self {
        Self {
            flags: CorrectionFlags::default(),
            event_wrr: EventWrrWeight::new(default_weight),
            volume_throttle: AllVolumeThrottle::default(),
        }
    }

    pub fn reset(&mut self, default_weight: i32) {
        self.flags = CorrectionFlags::default();
        self.event_wrr.reset(default_weight);
        self.volume_throttle.reset();
    }

    pub fn clear_flags(&mut self) {
        self.flags = CorrectionFlags::default();
    }
}
