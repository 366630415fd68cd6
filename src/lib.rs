#![forbid(unsafe_code)]

//! Volume QoS: admission control and backend scheduling for an NVMe-oF
//! storage array controller.
//!
//! Two halves, loosely coupled through a shared context:
//! 1. **Data path**: per-array [`volume::QosVolumeManager`]s admit or queue
//!    foreground I/O against per-volume token budgets with deficit
//!    carry-over; lane pollers replenish budgets and drain the queues.
//! 2. **Control loop**: Monitoring, Policy, and Correction managers take
//!    turns over a [`context::QosContext`], re-tuning backend event WRR
//!    weights and per-volume limits from measured load, GC pressure, and
//!    rebuild priority.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use volume_qos::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use volume_qos::core::config::QosConfig;
//! use volume_qos::manager::{ControlLoop, ManagerKind};
//! ```

pub mod prelude;

pub mod bridge;
pub mod context;
pub mod core;
pub mod logger;
pub mod manager;
pub mod volume;
