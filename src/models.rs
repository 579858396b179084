use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::history::RETENTION_MINUTES;

/// One GPU as reported by a single telemetry poll.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gpu {
    pub index: u32,
    pub name: String,
    pub temperature_c: f64,
    pub utilization_pct: f64,
    pub memory_used_mib: u64,
    pub memory_total_mib: u64,
    pub power_draw_w: f64,
}

impl Gpu {
    pub fn memory_pct(&self) -> f64 {
        if self.memory_total_mib == 0 {
            return 0.0;
        }
        self.memory_used_mib as f64 / self.memory_total_mib as f64 * 100.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PowerSample {
    pub timestamp: DateTime<Utc>,
    pub power_draw_w: f64,
}

/// Last probed state of the guard process on a host.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GuardState {
    pub is_running: bool,
    /// `None` until the first probe.
    pub last_checked: Option<DateTime<Utc>>,
}

/// Decision parameters for the idle-GPU check.
///
/// Only constructible through [`GuardPolicy::new`], so every policy that
/// reaches a node has already been validated.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GuardPolicy {
    interval_minutes: u32,
    power_threshold_w: f64,
}

impl GuardPolicy {
    pub const DEFAULT_INTERVAL_MINUTES: u32 = 10;
    pub const DEFAULT_THRESHOLD_W: f64 = 100.0;

    pub fn new(interval_minutes: u32, power_threshold_w: f64) -> Result<Self, PolicyError> {
        if interval_minutes == 0 || interval_minutes > RETENTION_MINUTES {
            return Err(PolicyError::Interval {
                got: interval_minutes,
                max: RETENTION_MINUTES,
            });
        }
        if !power_threshold_w.is_finite() || power_threshold_w < 0.0 {
            return Err(PolicyError::Threshold(power_threshold_w));
        }
        Ok(Self {
            interval_minutes,
            power_threshold_w,
        })
    }

    pub fn interval_minutes(&self) -> u32 {
        self.interval_minutes
    }

    pub fn power_threshold_w(&self) -> f64 {
        self.power_threshold_w
    }
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            interval_minutes: Self::DEFAULT_INTERVAL_MINUTES,
            power_threshold_w: Self::DEFAULT_THRESHOLD_W,
        }
    }
}

/// Wire form of a policy update. Unknown or missing fields are rejected
/// during deserialization.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PolicyDocument {
    pub guard_interval_minutes: u32,
    pub active_power_threshold: f64,
}

impl TryFrom<PolicyDocument> for GuardPolicy {
    type Error = PolicyError;

    fn try_from(doc: PolicyDocument) -> Result<Self, Self::Error> {
        GuardPolicy::new(doc.guard_interval_minutes, doc.active_power_threshold)
    }
}

impl From<GuardPolicy> for PolicyDocument {
    fn from(policy: GuardPolicy) -> Self {
        Self {
            guard_interval_minutes: policy.interval_minutes,
            active_power_threshold: policy.power_threshold_w,
        }
    }
}

/// Point-in-time view of one node, as reported to callers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub hostname: String,
    pub gpus: Vec<Gpu>,
    pub guard_running: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub need_guard: bool,
    pub is_online: bool,
}

/// Fleet-wide counters shown in the dashboard header.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FleetOverview {
    pub nodes: usize,
    pub online: usize,
    pub gpus: usize,
    pub guarded: usize,
    pub needing_guard: usize,
    pub mean_utilization_pct: Option<f64>,
}

impl FleetOverview {
    pub fn from_snapshots(snapshots: &[NodeSnapshot]) -> Self {
        let utils: Vec<f64> = snapshots
            .iter()
            .flat_map(|s| s.gpus.iter().map(|g| g.utilization_pct))
            .collect();
        let mean_utilization_pct = if utils.is_empty() {
            None
        } else {
            Some(utils.iter().sum::<f64>() / utils.len() as f64)
        };
        Self {
            nodes: snapshots.len(),
            online: snapshots.iter().filter(|s| s.is_online).count(),
            gpus: utils.len(),
            guarded: snapshots.iter().filter(|s| s.guard_running).count(),
            needing_guard: snapshots.iter().filter(|s| s.need_guard).count(),
            mean_utilization_pct,
        }
    }
}
