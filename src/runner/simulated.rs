use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{is_kill_request, CommandRunner};
use crate::error::CommandError;

const SIMULATED_GPUS: u32 = 8;
const SIMULATED_MEMORY_MIB: u64 = 16_000;

/// An in-memory host for dry runs: answers the telemetry query with random
/// readings and tracks a guard flag for the probe, launch and kill commands.
pub struct SimulatedHost {
    hostname: String,
    guard_running: bool,
    rng: StdRng,
}

impl SimulatedHost {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self::with_rng(hostname, StdRng::from_entropy())
    }

    pub fn with_seed(hostname: impl Into<String>, seed: u64) -> Self {
        Self::with_rng(hostname, StdRng::seed_from_u64(seed))
    }

    fn with_rng(hostname: impl Into<String>, rng: StdRng) -> Self {
        Self {
            hostname: hostname.into(),
            guard_running: false,
            rng,
        }
    }

    fn telemetry(&mut self) -> String {
        (0..SIMULATED_GPUS)
            .map(|index| {
                format!(
                    "{index}, Simulated GPU {index}, {:.0}, {:.0}, {}, {SIMULATED_MEMORY_MIB}, {:.2}",
                    self.rng.gen_range(30.0..80.0),
                    self.rng.gen_range(0.0..100.0),
                    self.rng.gen_range(0..=SIMULATED_MEMORY_MIB),
                    self.rng.gen_range(50.0..250.0),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl CommandRunner for SimulatedHost {
    async fn run(&mut self, command: &str, _timeout: Duration) -> Result<String, CommandError> {
        if command.starts_with("nvidia-smi") {
            return Ok(self.telemetry());
        }
        if command.starts_with("ps aux") {
            return Ok(if self.guard_running {
                format!("root 4242 99.0 1.2 python gpu_guard.py --name gpu_guard_{}", self.hostname)
            } else {
                String::new()
            });
        }
        if is_kill_request(command) {
            self.guard_running = false;
            return Ok(String::new());
        }
        if command.contains("bash ") {
            self.guard_running = true;
            return Ok(String::new());
        }
        Err(CommandError::Failed {
            status: "exit code 127".into(),
            stderr: format!("sh: {command}: command not found"),
        })
    }

    fn is_local(&self) -> bool {
        false
    }
}
