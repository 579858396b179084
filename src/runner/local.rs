use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;

use super::{check_exit, CommandRunner, ExitKind};
use crate::error::CommandError;

/// Runs commands on this machine through `sh -c`.
#[derive(Debug, Default)]
pub struct LocalRunner;

impl LocalRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn run(&mut self, command: &str, timeout: Duration) -> Result<String, CommandError> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        // Dropping the output future on timeout kills the child.
        let output = match tokio::time::timeout(timeout, child).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(command, ?timeout, "local command timed out");
                return Err(CommandError::Timeout(timeout));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let result = check_exit(command, ExitKind::from(output.status), &stdout, &stderr);
        if let Err(err) = &result {
            warn!(command, error = %err, "local command failed");
        }
        result
    }

    fn is_local(&self) -> bool {
        true
    }
}
