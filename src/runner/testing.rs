use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{is_kill_request, CommandRunner};
use crate::error::CommandError;

/// Shared state of a [`FakeHost`], kept by the test after the runner has
/// been moved into a node.
#[derive(Debug, Default)]
pub(crate) struct FakeHostState {
    pub commands: Vec<String>,
    /// `None` makes the telemetry command fail.
    pub telemetry: Option<String>,
    pub guard_running: bool,
    /// Whether the launch command actually brings the guard up.
    pub launch_works: bool,
    /// Whether the kill command actually takes the guard down.
    pub kill_works: bool,
    pub offline: bool,
}

impl FakeHostState {
    pub fn count(&self, needle: &str) -> usize {
        self.commands.iter().filter(|c| c.contains(needle)).count()
    }
}

/// Scriptable stand-in for a host that records every command it receives.
#[derive(Clone)]
pub(crate) struct FakeHost {
    pub state: Arc<Mutex<FakeHostState>>,
}

impl FakeHost {
    pub fn new(telemetry: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeHostState {
                telemetry: Some(telemetry.to_string()),
                launch_works: true,
                kill_works: true,
                ..Default::default()
            })),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeHostState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn boxed(&self) -> Box<dyn CommandRunner> {
        Box::new(self.clone())
    }
}

#[async_trait]
impl CommandRunner for FakeHost {
    async fn run(&mut self, command: &str, _timeout: Duration) -> Result<String, CommandError> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.to_string());
        if state.offline {
            return Err(CommandError::Offline("fake".into()));
        }
        if command.starts_with("nvidia-smi") {
            return state.telemetry.clone().ok_or_else(|| CommandError::Failed {
                status: "exit code 9".into(),
                stderr: "NVIDIA-SMI has failed".into(),
            });
        }
        if command.starts_with("ps aux") {
            return Ok(if state.guard_running {
                "root 1 0.0 0.0 python gpu_guard".to_string()
            } else {
                String::new()
            });
        }
        if is_kill_request(command) {
            if state.kill_works {
                state.guard_running = false;
            }
            return Ok(String::new());
        }
        if command.contains("bash ") {
            if state.launch_works {
                state.guard_running = true;
            }
            return Ok(String::new());
        }
        Err(CommandError::Failed {
            status: "exit code 127".into(),
            stderr: "not found".into(),
        })
    }

    fn is_online(&self) -> bool {
        !self.state.lock().unwrap().offline
    }

    fn is_local(&self) -> bool {
        false
    }
}
