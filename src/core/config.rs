//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{QosError, Result};
use crate::core::types::preset;

/// Full engine configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
#[derive(Default)]
pub struct QosConfig {
    pub engine: EngineConfig,
    pub throttle: ThrottleConfig,
    pub wrr: WrrConfig,
    pub urgency: UrgencyConfig,
    pub log: LogConfig,
}

/// Topology and cadence knobs fixed at engine construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Master switch for front-end admission control. Backend event weight
    /// correction runs regardless.
    pub fe_qos_enabled: bool,
    /// Number of I/O polling lanes (reactors). Sizes the lane-major arenas.
    pub lane_count: u32,
    /// Maximum volumes per array. Sizes the per-volume arenas.
    pub max_volume_count: u32,
    /// Number of storage arrays served by this engine instance.
    pub array_count: u32,
    /// Budget replenishment time slice in microseconds.
    pub time_slice_us: u64,
    /// Poller invocations per time slice (sub-tick drain cadence).
    pub polls_per_time_slice: u64,
    /// How long a mount/unmount/detach caller waits for the owner-lane ack.
    pub lifecycle_timeout_ms: u64,
    /// Policy cycles between measured-average band evaluations.
    pub correction_cycle_period: u64,
}

/// Token-budget tuning for the admission path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Multiplier converting a per-tick rate limit into a per-replenishment
    /// cycle token budget.
    pub global_throttling_factor: u64,
    /// Floor for any lane-local bandwidth share, bytes per slice.
    pub min_bw_budget: u64,
    /// Floor for any lane-local IOPS share.
    pub min_iops_budget: u64,
    /// Upper band over a minimum guarantee (percent) before throttling eases.
    pub upper_threshold_pct: u64,
}

/// Weighted-round-robin correction constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WrrConfig {
    /// Weight restored by a Reset directive.
    pub default_weight: i32,
    /// Unit step scaled by the Increase/Decrease directive multipliers.
    pub unit_step: i32,
    /// Lower clamp bound (most-serviced extreme).
    pub max_negative_weight: i32,
    /// Upper clamp bound (least-serviced extreme).
    pub max_positive_weight: i32,
}

/// Resource-urgency thresholds consulted by the policy evaluators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UrgencyConfig {
    /// Free-segment counts at which GC pressure escalates.
    pub gc_medium_free_segments: u32,
    pub gc_high_free_segments: u32,
    pub gc_critical_free_segments: u32,
    /// Used NVRAM stripe count above which volume throttling is forced.
    pub stripe_high_watermark: u32,
}

/// Decision-log sink settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    pub jsonl_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fe_qos_enabled: true,
            lane_count: 4,
            max_volume_count: 256,
            array_count: 1,
            time_slice_us: 1_000,
            polls_per_time_slice: 4,
            lifecycle_timeout_ms: 2_000,
            correction_cycle_period: 2_000,
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_throttling_factor: 1,
            min_bw_budget: 10 * 1024,
            min_iops_budget: 1,
            upper_threshold_pct: 110,
        }
    }
}

impl Default for WrrConfig {
    fn default() -> Self {
        Self {
            default_weight: 16,
            unit_step: 2,
            max_negative_weight: preset::PRIO_WT_HIGHEST,
            max_positive_weight: 16,
        }
    }
}

impl Default for UrgencyConfig {
    fn default() -> Self {
        Self {
            gc_medium_free_segments: 120,
            gc_high_free_segments: 60,
            gc_critical_free_segments: 20,
            stripe_high_watermark: 1_000,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            jsonl_path: None,
        }
    }
}

impl QosConfig {
    /// Load config from an explicit path, or from `VOLUME_QOS_CONFIG` when
    /// set, falling back to defaults when neither names a file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path.map(Path::to_path_buf);
        let from_env = env::var_os("VOLUME_QOS_CONFIG").map(PathBuf::from);

        let cfg = match (explicit, from_env) {
            (Some(p), _) => Self::from_toml_file(&p)?,
            (None, Some(p)) if p.as_os_str().is_empty() => Self::default(),
            (None, Some(p)) => Self::from_toml_file(&p)?,
            (None, None) => Self::default(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML file; the file must exist.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(QosError::MissingConfig {
                path: path.to_path_buf(),
            });
        }
        let raw = fs::read_to_string(path).map_err(|source| QosError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let parsed: Self = toml::from_str(raw)?;
        Ok(parsed)
    }

    /// Reject configurations the arenas or the correction arithmetic cannot
    /// serve.
    pub fn validate(&self) -> Result<()> {
        if self.engine.lane_count == 0 {
            return invalid("engine.lane_count must be at least 1");
        }
        if self.engine.max_volume_count == 0 {
            return invalid("engine.max_volume_count must be at least 1");
        }
        if self.engine.array_count == 0 {
            return invalid("engine.array_count must be at least 1");
        }
        if self.engine.time_slice_us == 0 {
            return invalid("engine.time_slice_us must be positive");
        }
        if self.engine.polls_per_time_slice == 0 {
            return invalid("engine.polls_per_time_slice must be positive");
        }
        if self.wrr.unit_step <= 0 {
            return invalid("wrr.unit_step must be positive");
        }
        if self.wrr.max_negative_weight >= self.wrr.max_positive_weight {
            return invalid("wrr.max_negative_weight must be below wrr.max_positive_weight");
        }
        if self.wrr.default_weight > self.wrr.max_positive_weight
            || self.wrr.default_weight < self.wrr.max_negative_weight
        {
            return invalid("wrr.default_weight must lie within the clamp bounds");
        }
        if self.urgency.gc_critical_free_segments > self.urgency.gc_high_free_segments
            || self.urgency.gc_high_free_segments > self.urgency.gc_medium_free_segments
        {
            return invalid("urgency.gc_* thresholds must be ordered critical <= high <= medium");
        }
        if self.throttle.upper_threshold_pct < 100 {
            return invalid("throttle.upper_threshold_pct must be at least 100");
        }
        if self.log.enabled && self.log.jsonl_path.is_none() {
            return invalid("log.jsonl_path required when log.enabled");
        }
        Ok(())
    }

    /// Per-cycle token quota for one metric limit. Saturates so an
    /// unlimited policy yields an effectively infinite signed budget.
    #[must_use]
    pub const fn cycle_quota(&self, user_max: u64) -> i64 {
        let quota = user_max.saturating_mul(self.throttle.global_throttling_factor);
        if quota > i64::MAX as u64 {
            i64::MAX
        } else {
            quota as i64
        }
    }
}

fn invalid(details: &str) -> Result<()> {
    Err(QosError::InvalidConfig {
        details: details.to_string(),
    })
}
