use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::guard::GuardController;
use crate::history::PowerHistory;
use crate::models::{Gpu, GuardPolicy, GuardState, NodeSnapshot};
use crate::nvidia::GpuSampler;
use crate::runner::CommandRunner;

/// One monitored host and everything known about it.
pub struct Node {
    hostname: String,
    runner: Box<dyn CommandRunner>,
    sampler: GpuSampler,
    guard: GuardController,
    gpus: Vec<Gpu>,
    power_history: PowerHistory,
    guard_state: GuardState,
    policy: GuardPolicy,
    last_update_time: Option<DateTime<Utc>>,
}

impl Node {
    pub fn new(
        hostname: impl Into<String>,
        runner: Box<dyn CommandRunner>,
        sampler: GpuSampler,
        guard: GuardController,
        policy: GuardPolicy,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            runner,
            sampler,
            guard,
            gpus: Vec::new(),
            power_history: PowerHistory::new(),
            guard_state: GuardState::default(),
            policy,
            last_update_time: None,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn is_local(&self) -> bool {
        self.runner.is_local()
    }

    pub fn is_online(&self) -> bool {
        self.runner.is_online()
    }

    pub fn gpus(&self) -> &[Gpu] {
        &self.gpus
    }

    pub fn power_history(&self) -> &PowerHistory {
        &self.power_history
    }

    pub fn guard_state(&self) -> GuardState {
        self.guard_state
    }

    pub fn policy(&self) -> GuardPolicy {
        self.policy
    }

    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        self.last_update_time
    }

    /// Poll telemetry, then probe the guard.
    #[instrument(skip(self), fields(host = %self.hostname))]
    pub async fn update(&mut self) {
        self.refresh_telemetry(Utc::now()).await;
        self.guard.probe(self.runner.as_mut(), &mut self.guard_state).await;
    }

    /// Replace the GPU snapshot and record power for every parsed GPU. A
    /// failed query leaves the previous snapshot and history untouched, so
    /// a telemetry gap is never mistaken for zero power.
    async fn refresh_telemetry(&mut self, now: DateTime<Utc>) -> bool {
        match self.sampler.sample(&self.hostname, self.runner.as_mut()).await {
            Ok(gpus) => {
                for gpu in &gpus {
                    self.power_history.record(gpu.index, gpu.power_draw_w, now);
                }
                self.gpus = gpus;
                self.last_update_time = Some(now);
                true
            }
            Err(err) => {
                warn!(host = %self.hostname, error = %err, "telemetry unavailable, keeping last snapshot");
                false
            }
        }
    }

    pub fn need_guard(&self) -> bool {
        self.need_guard_at(Utc::now())
    }

    /// A single idle or silent GPU is enough to guard the whole host, even
    /// when every other GPU is busy.
    pub fn need_guard_at(&self, now: DateTime<Utc>) -> bool {
        let interval = self.policy.interval_minutes();
        let threshold = self.policy.power_threshold_w();
        self.power_history.indices().any(|index| {
            match self.power_history.windowed_average(index, interval, now) {
                None => {
                    debug!(host = %self.hostname, index, "no recent power samples");
                    true
                }
                Some(avg) => avg < threshold,
            }
        })
    }

    pub fn set_policy(&mut self, policy: GuardPolicy) {
        self.policy = policy;
    }

    #[instrument(skip(self), fields(host = %self.hostname))]
    pub async fn start_guard(&mut self) -> bool {
        self.guard.start(self.runner.as_mut(), &mut self.guard_state).await
    }

    #[instrument(skip(self), fields(host = %self.hostname))]
    pub async fn stop_guard(&mut self) -> bool {
        self.guard.stop(self.runner.as_mut(), &mut self.guard_state).await
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            hostname: self.hostname.clone(),
            gpus: self.gpus.clone(),
            guard_running: self.guard_state.is_running,
            last_updated: self.last_update_time,
            need_guard: self.need_guard(),
            is_online: self.is_online(),
        }
    }

    pub async fn close(&mut self) {
        self.runner.close().await;
    }

    #[cfg(test)]
    pub(crate) fn power_history_mut(&mut self) -> &mut PowerHistory {
        &mut self.power_history
    }
}
