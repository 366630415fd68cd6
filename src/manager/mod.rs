//! The Monitor → Policy → Correction control loop.
//!
//! One internal manager is active at a time. Each `execute` pass reads and
//! mutates the shared [`QosContext`], then names the next manager; the loop
//! rebuilds the active manager from that tag. Transitions: Monitoring →
//! Policy → Correction → Monitoring, with Correction skipped whenever Policy
//! decides no corrective action is due.

pub mod correction;
pub mod monitor;
pub mod policy;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::bridge::{EventScheduler, LaneRouter, ResourceSource};
use crate::context::QosContext;
use crate::core::config::QosConfig;
use crate::logger::jsonl::{EventType, LogEntry, Severity};
use crate::logger::DecisionLog;
use crate::volume::QosVolumeManagerSet;

pub use correction::QosCorrectionManager;
pub use monitor::QosMonitoringManager;
pub use policy::QosPolicyManager;

// ──────────────────── manager tags ────────────────────

/// Which internal manager runs the next pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerKind {
    /// Sample gathering into the context.
    Monitoring,
    /// Decide whether a correction is due.
    Policy,
    /// Apply pending weight and throttle directives.
    Correction,
}

// ──────────────────── shared dependencies ────────────────────

/// Everything an internal manager touches during one execute pass. Borrowed
/// fresh from the control loop per pass; the field borrows are disjoint so a
/// manager can hold the context mutably while reading config or pushing to
/// the scheduler.
pub struct ManagerDeps<'a> {
    /// Engine configuration, read-only for the life of the loop.
    pub config: &'a QosConfig,
    /// Shared state every manager reads and mutates.
    pub context: &'a mut QosContext,
    /// Per-array data-path managers.
    pub volumes: &'a QosVolumeManagerSet,
    /// Backend WRR weight sink.
    pub scheduler: &'a dyn EventScheduler,
    /// Backend resource counters and bandwidth queues.
    pub resources: &'a dyn ResourceSource,
    /// Lane-to-subsystem routing and connection counts.
    pub router: &'a dyn LaneRouter,
    /// Decision log for applied corrections.
    pub log: &'a mut DecisionLog,
    /// Shutdown flag shared with the lane pollers.
    pub exit: &'a AtomicBool,
}

// ──────────────────── tagged manager ────────────────────

/// The active internal manager. Rebuilt on every transition; all state that
/// must survive a transition lives in the context, not here.
#[derive(Debug)]
pub enum InternalManager {
    /// Sample-gathering pass.
    Monitoring(QosMonitoringManager),
    /// Decision pass.
    Policy(QosPolicyManager),
    /// Directive-applying pass.
    Correction(QosCorrectionManager),
}

impl InternalManager {
    /// Construct the manager for a tag.
    #[must_use]
    pub fn build(kind: ManagerKind) -> Self {
        match kind {
            ManagerKind::Monitoring => Self::Monitoring(QosMonitoringManager::new()),
            ManagerKind::Policy => Self::Policy(QosPolicyManager::new()),
            ManagerKind::Correction => Self::Correction(QosCorrectionManager::new()),
        }
    }

    /// Tag of the currently-built manager.
    #[must_use]
    pub const fn kind(&self) -> ManagerKind {
        match self {
            Self::Monitoring(_) => ManagerKind::Monitoring,
            Self::Policy(_) => ManagerKind::Policy,
            Self::Correction(_) => ManagerKind::Correction,
        }
    }

    /// Run one pass and name the next manager.
    pub fn execute(&mut self, deps: &mut ManagerDeps<'_>) -> ManagerKind {
        match self {
            Self::Monitoring(manager) => manager.execute(deps),
            Self::Policy(manager) => manager.execute(deps),
            Self::Correction(manager) => manager.execute(deps),
        }
    }
}

// ──────────────────── driving loop ────────────────────

/// Owns the context and the active manager; drives the state machine until
/// the shared exit flag is raised.
pub struct ControlLoop {
    config: QosConfig,
    context: QosContext,
    volumes: Arc<QosVolumeManagerSet>,
    scheduler: Arc<dyn EventScheduler>,
    resources: Arc<dyn ResourceSource>,
    router: Arc<dyn LaneRouter>,
    log: DecisionLog,
    active: InternalManager,
    exit: Arc<AtomicBool>,
}

impl ControlLoop {
    /// Wire the loop over an already-built manager set. The context passed in
    /// must be the one whose barrier the pollers were registered against.
    #[must_use]
    pub fn new(
        config: QosConfig,
        context: QosContext,
        volumes: Arc<QosVolumeManagerSet>,
        scheduler: Arc<dyn EventScheduler>,
        resources: Arc<dyn ResourceSource>,
        router: Arc<dyn LaneRouter>,
        exit: Arc<AtomicBool>,
    ) -> Self {
        let mut log = DecisionLog::from_config(&config.log);
        log.write(&LogEntry::new(EventType::EngineStart, Severity::Info));
        Self {
            config,
            context,
            volumes,
            scheduler,
            resources,
            router,
            log,
            active: InternalManager::build(ManagerKind::Monitoring),
            exit,
        }
    }

    /// Tag of the manager that will run next.
    #[must_use]
    pub const fn active_kind(&self) -> ManagerKind {
        self.active.kind()
    }

    /// Read-only view of the shared context, for observability.
    #[must_use]
    pub const fn context(&self) -> &QosContext {
        &self.context
    }

    /// Execute the active manager once and transition. Returns the tag that
    /// was just executed.
    pub fn run_cycle(&mut self) -> ManagerKind {
        let executed = self.active.kind();
        let mut deps = ManagerDeps {
            config: &self.config,
            context: &mut self.context,
            volumes: &self.volumes,
            scheduler: self.scheduler.as_ref(),
            resources: self.resources.as_ref(),
            router: self.router.as_ref(),
            log: &mut self.log,
            exit: &self.exit,
        };
        let next = self.active.execute(&mut deps);
        self.active = InternalManager::build(next);
        executed
    }

    /// Run until the exit flag is raised, then flush the decision log.
    ///
    /// Each full Monitor → Policy (→ Correction) round is followed by one
    /// poll interval of sleep so the managers sample at the configured
    /// cadence rather than spinning the core.
    pub fn run(&mut self) {
        let interval = Duration::from_micros(
            self.config.engine.time_slice_us / self.config.engine.polls_per_time_slice.max(1),
        );
        while !self.exit.load(Ordering::Acquire) {
            self.run_cycle();
            if self.active.kind() == ManagerKind::Monitoring {
                thread::sleep(interval);
            }
        }
        self.log
            .write(&LogEntry::new(EventType::EngineStop, Severity::Info));
        self.log.flush();
    }
}

// ──────────────────── test harness ────────────────────
