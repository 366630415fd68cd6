//! Owner-lane lifecycle handoff.
//!
//! The subsystem-to-volume map and lane-local limit slots may only be
//! mutated from the owner lane. Mount/unmount/detach callers on other
//! threads push a command into a bounded inbox and wait for the owner
//! lane's ack with a deadline; the owner lane drains the inbox at the top
//! of each poll.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::core::errors::{QosError, Result};
use crate::core::types::{NqnId, VolumeId};

/// A lifecycle mutation that must run on the owner lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOp {
    /// Attach a volume to a subsystem and arm its throttle slots.
    Mount { volume: VolumeId, nqn: NqnId },
    /// Detach a volume from a subsystem and zero its throttle slots.
    Unmount { volume: VolumeId, nqn: NqnId },
    /// Detach every volume still attached to a subsystem.
    DetachSubsystem { nqn: NqnId },
}

impl LifecycleOp {
    /// Operation name for errors and the decision log.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mount { .. } => "mount",
            Self::Unmount { .. } => "unmount",
            Self::DetachSubsystem { .. } => "detach_subsystem",
        }
    }

    /// Subject id for errors; the volume for volume ops, the subsystem for
    /// detach.
    #[must_use]
    pub const fn subject(self) -> u32 {
        match self {
            Self::Mount { volume, .. } | Self::Unmount { volume, .. } => volume,
            Self::DetachSubsystem { nqn } => nqn,
        }
    }
}

#[derive(Debug)]
struct Command {
    op: LifecycleOp,
    ack: Sender<()>,
}

/// Bounded command inbox between lifecycle callers and the owner lane.
#[derive(Debug)]
pub struct LifecycleInbox {
    tx: Sender<Command>,
    rx: Receiver<Command>,
}

impl LifecycleInbox {
    /// Mount/unmount are rare and latency-tolerant; a small bound is enough
    /// and keeps a wedged owner lane from accumulating callers.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }

    /// Route one operation to the owner lane and wait for its ack.
    pub fn dispatch(&self, op: LifecycleOp, timeout: Duration) -> Result<()> {
        let (ack_tx, ack_rx) = bounded(1);
        self.tx
            .send_timeout(Command { op, ack: ack_tx }, timeout)
            .map_err(|_| QosError::LifecycleTimeout {
                operation: op.name(),
                volume_id: op.subject(),
                timeout_ms: timeout.as_millis() as u64,
            })?;
        ack_rx
            .recv_timeout(timeout)
            .map_err(|_| QosError::LifecycleTimeout {
                operation: op.name(),
                volume_id: op.subject(),
                timeout_ms: timeout.as_millis() as u64,
            })
    }

    /// Owner lane: apply every queued operation, acking each. Callers whose
    /// ack channel is gone (dispatch timed out) are skipped silently.
    pub fn drain(&self, mut apply: impl FnMut(LifecycleOp)) {
        while let Ok(command) = self.rx.try_recv() {
            apply(command.op);
            let _ = command.ack.send(());
        }
    }
}
