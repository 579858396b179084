use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use gpu_guard::config::FleetConfig;

#[derive(Parser)]
#[command(about, long_about, version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Live dashboard (default)
    Watch,
    /// Poll every host once and print snapshots as JSON
    Status,
    /// Start the guard on the given hosts, or on every host
    Start { hosts: Vec<String> },
    /// Stop the guard on the given hosts, or on every host
    Stop { hosts: Vec<String> },
    /// Poll once and report which hosts need a guard
    #[command(name = "need-guard")]
    NeedGuard { hosts: Vec<String> },
}

/// Flags layered over the config file and environment.
#[derive(Args)]
pub struct GlobalArgs {
    /// YAML configuration file
    #[arg(short, long, global = true, env = "GPU_GUARD_CONFIG")]
    pub config: Option<PathBuf>,
    /// Host list, one host per line
    #[arg(long = "hosts", value_name = "FILE", global = true)]
    pub host_file: Option<PathBuf>,
    /// Replace the host list with N simulated hosts
    #[arg(long, global = true, value_name = "N")]
    pub simulate: Option<usize>,
    /// Averaging window in minutes
    #[arg(long, global = true)]
    pub interval: Option<u32>,
    /// Power threshold in watts
    #[arg(long, global = true)]
    pub threshold: Option<f64>,
    /// Start guards automatically after each dashboard poll
    #[arg(long, global = true)]
    pub auto_guard: bool,
    #[arg(long, global = true)]
    pub max_concurrency: Option<usize>,
}

impl GlobalArgs {
    pub fn apply(&self, config: &mut FleetConfig) {
        if let Some(path) = &self.host_file {
            config.host_file = path.clone();
        }
        if self.simulate.is_some() {
            config.simulate = self.simulate;
        }
        if let Some(interval) = self.interval {
            config.policy.guard_interval_minutes = interval;
        }
        if let Some(threshold) = self.threshold {
            config.policy.active_power_threshold = threshold;
        }
        if self.auto_guard {
            config.auto_guard = true;
        }
        if let Some(n) = self.max_concurrency {
            config.max_concurrency = n.max(1);
        }
    }
}
