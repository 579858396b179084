//! Command execution against one host, either in-process or over ssh.
//!
//! Every runner applies the same exit-status policy (see [`check_exit`]) so
//! callers never need to know where a command actually ran.

mod local;
mod locality;
mod remote;
mod simulated;
mod ssh;
#[cfg(test)]
pub(crate) mod testing;

use std::process::ExitStatus;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::CommandError;

pub use local::LocalRunner;
pub use locality::LocalIdentity;
pub use remote::{Connector, RawOutput, RemoteRunner, Session};
pub use simulated::SimulatedHost;
pub use ssh::{SshConnector, SshSession};

const SIGTERM: i32 = 15;

#[async_trait]
pub trait CommandRunner: Send {
    /// Run `command` through a shell on the target, returning trimmed stdout.
    async fn run(&mut self, command: &str, timeout: Duration) -> Result<String, CommandError>;

    /// Whether the last attempt to reach the host succeeded.
    fn is_online(&self) -> bool {
        true
    }

    fn is_local(&self) -> bool;

    /// Release any session held for the host.
    async fn close(&mut self) {}
}

/// How a command ended, independent of where it ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitKind {
    Code(i32),
    Signal(i32),
}

impl From<ExitStatus> for ExitKind {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitKind::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitKind::Signal(signal);
            }
        }
        ExitKind::Code(-1)
    }
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitKind::Code(code) => write!(f, "exit code {code}"),
            ExitKind::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// `pkill -f <name>` run through `sh -c` matches its own shell, so the
/// shell dies of SIGTERM even though the kill worked.
pub(crate) fn is_kill_request(command: &str) -> bool {
    matches!(
        command.split_whitespace().next(),
        Some("pkill") | Some("kill") | Some("killall")
    )
}

/// Exit-status policy shared by every runner.
///
/// 0 and 1 succeed (grep and friends exit 1 on "no match"). Death by
/// SIGTERM, or 143 when reported through a shell, succeeds only for kill
/// requests. Anything else fails with the captured stderr.
pub(crate) fn check_exit(
    command: &str,
    exit: ExitKind,
    stdout: &str,
    stderr: &str,
) -> Result<String, CommandError> {
    match exit {
        ExitKind::Code(0) | ExitKind::Code(1) => Ok(stdout.trim().to_string()),
        ExitKind::Signal(SIGTERM) | ExitKind::Code(143) if is_kill_request(command) => {
            debug!(command, "kill request terminated its own shell");
            Ok(String::new())
        }
        other => Err(CommandError::Failed {
            status: other.to_string(),
            stderr: stderr.trim().to_string(),
        }),
    }
}
