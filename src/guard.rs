//! Lifecycle of the guard process that keeps a host's GPUs busy.
//!
//! Nothing here trusts cached state: every start or stop probes the host
//! first, acts only if needed, and reports what a second probe observed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::GuardConfig;
use crate::models::GuardState;
use crate::runner::CommandRunner;

/// Per-host guard commands and the probe/act/re-probe discipline.
#[derive(Clone, Debug)]
pub struct GuardController {
    host: String,
    guard_name: String,
    script_dir: PathBuf,
    script: String,
    log_dir: PathBuf,
    settle_delay: Duration,
    timeout: Duration,
}

impl GuardController {
    pub fn new(host: &str, config: &GuardConfig, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            guard_name: guard_name(host),
            script_dir: config.script_dir.clone(),
            script: config.script.clone(),
            log_dir: config.log_root.join(host),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            timeout,
        }
    }

    pub fn guard_name(&self) -> &str {
        &self.guard_name
    }

    pub fn probe_command(&self) -> String {
        format!("ps aux | grep '{}' | grep -v grep", self.guard_name)
    }

    pub fn start_command(&self) -> String {
        format!(
            "mkdir -p {log_dir} && cd {dir} && bash {script} {name} {log}",
            log_dir = quote(&self.log_dir),
            dir = quote(&self.script_dir),
            script = self.script,
            name = self.guard_name,
            log = quote(&self.log_dir.join("gpu_guard.log")),
        )
    }

    pub fn stop_command(&self) -> String {
        format!("pkill -f {}", self.guard_name)
    }

    /// Refresh `state` from the host's process table. A failed probe reads
    /// as not running.
    pub async fn probe(&self, runner: &mut dyn CommandRunner, state: &mut GuardState) {
        let result = runner.run(&self.probe_command(), self.timeout).await;
        state.is_running = matches!(&result, Ok(out) if !out.is_empty());
        state.last_checked = Some(Utc::now());
        if let Err(err) = result {
            warn!(host = %self.host, error = %err, "guard probe failed");
        }
    }

    /// Start the guard unless it is already running. Returns the post-probe
    /// `is_running`.
    pub async fn start(&self, runner: &mut dyn CommandRunner, state: &mut GuardState) -> bool {
        self.probe(runner, state).await;
        if state.is_running {
            info!(host = %self.host, "guard already running");
            return true;
        }

        if let Err(err) = runner.run(&self.start_command(), self.timeout).await {
            warn!(host = %self.host, error = %err, "failed to launch guard");
        }
        tokio::time::sleep(self.settle_delay).await;
        self.probe(runner, state).await;

        if state.is_running {
            info!(host = %self.host, "guard started");
        } else {
            warn!(host = %self.host, "guard not running after launch");
        }
        state.is_running
    }

    /// Stop the guard if it is running. Returns `true` when the post-probe
    /// shows it stopped.
    pub async fn stop(&self, runner: &mut dyn CommandRunner, state: &mut GuardState) -> bool {
        self.probe(runner, state).await;
        if !state.is_running {
            info!(host = %self.host, "guard not running");
            return true;
        }

        if let Err(err) = runner.run(&self.stop_command(), self.timeout).await {
            warn!(host = %self.host, error = %err, "failed to kill guard");
        }
        tokio::time::sleep(self.settle_delay).await;
        self.probe(runner, state).await;

        if state.is_running {
            warn!(host = %self.host, "guard still running after kill");
        } else {
            info!(host = %self.host, "guard stopped");
        }
        !state.is_running
    }
}

pub fn guard_name(host: &str) -> String {
    format!("gpu_guard_{host}")
}

fn quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}
