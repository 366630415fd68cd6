//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use volume_qos::prelude::*;
//! ```

// Core
pub use crate::core::config::QosConfig;
pub use crate::core::errors::{QosError, Result};
pub use crate::core::types::{
    ArrayId, BackendEvent, GcPressure, LaneId, NqnId, RebuildImpact, ThrottleMetric, VolumeId,
    VolumeIo,
};

// Bridge
pub use crate::bridge::{
    EventScheduler, LaneLocator, LaneRouter, PolicySource, ResourceSource, SubmissionAdapter,
};

// Context
pub use crate::context::{QosContext, ReactorBarrier, VolumeKey};
pub use crate::context::user_policy::VolumeUserPolicy;

// Data path
pub use crate::volume::{QosVolumeManager, QosVolumeManagerSet, VolumeSample};

// Control loop
pub use crate::manager::{ControlLoop, InternalManager, ManagerKind};

// Logging
pub use crate::logger::DecisionLog;
