use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::remote::{Connector, RawOutput, Session};
use super::ExitKind;
use crate::error::CommandError;

/// ssh reserves this status for its own failures.
const SSH_TRANSPORT_EXIT: i32 = 255;

/// Opens OpenSSH control-master sessions. Authentication is whatever the
/// local ssh client is configured for; prompts are disabled.
#[derive(Clone, Debug)]
pub struct SshConnector {
    connect_timeout: Duration,
    persist: Duration,
}

impl SshConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            persist: Duration::from_secs(600),
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, host: &str) -> Result<Box<dyn Session>, CommandError> {
        let session = SshSession::open(host, self.connect_timeout, self.persist).await?;
        Ok(Box::new(session))
    }
}

/// One multiplexed ssh connection, addressed through its control socket.
#[derive(Debug)]
pub struct SshSession {
    host: String,
    control_path: PathBuf,
}

impl SshSession {
    pub async fn open(
        host: &str,
        connect_timeout: Duration,
        persist: Duration,
    ) -> Result<Self, CommandError> {
        let control_path = control_path_for(host);
        let master = Command::new("ssh")
            .args(base_options(&control_path))
            .arg("-o")
            .arg(format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)))
            .arg("-o")
            .arg("ControlMaster=yes")
            .arg("-o")
            .arg(format!("ControlPersist={}s", persist.as_secs()))
            .args(["-N", "-f", host])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        // ssh enforces ConnectTimeout itself; the outer bound covers auth hangs.
        let output = tokio::time::timeout(connect_timeout * 2, master)
            .await
            .map_err(|_| CommandError::Connect {
                host: host.to_string(),
                reason: format!("no answer within {:?}", connect_timeout * 2),
            })??;

        if !output.status.success() {
            return Err(CommandError::Connect {
                host: host.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(host, control = %control_path.display(), "ssh session established");
        Ok(Self {
            host: host.to_string(),
            control_path,
        })
    }
}

#[async_trait]
impl Session for SshSession {
    async fn exec(&mut self, command: &str, timeout: Duration) -> Result<RawOutput, CommandError> {
        let child = Command::new("ssh")
            .args(base_options(&self.control_path))
            .arg("-o")
            .arg("ControlMaster=no")
            .arg(&self.host)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| CommandError::Timeout(timeout))??;

        let exit = ExitKind::from(output.status);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if exit == ExitKind::Code(SSH_TRANSPORT_EXIT) {
            return Err(CommandError::Transport(stderr.trim().to_string()));
        }

        Ok(RawOutput {
            exit,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }

    async fn close(&mut self) {
        let result = Command::new("ssh")
            .args(base_options(&self.control_path))
            .args(["-O", "exit", self.host.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        debug!(host = %self.host, ?result, "ssh session closed");
    }
}

fn base_options(control_path: &std::path::Path) -> Vec<String> {
    vec![
        "-o".into(),
        "BatchMode=yes".into(),
        "-o".into(),
        format!("ControlPath={}", control_path.display()),
    ]
}

/// Unix sockets have a short path limit, so keep the name compact.
fn control_path_for(host: &str) -> PathBuf {
    let safe: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .take(48)
        .collect();
    std::env::temp_dir().join(format!("gpu-guard-{}-{safe}.sock", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_path_is_sanitised() {
        let path = control_path_for("user@gpu-01.example.com");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("gpu-guard-"));
        assert!(name.ends_with("user_gpu-01.example.com.sock"));
    }

    #[test]
    fn base_options_disable_prompts() {
        let opts = base_options(std::path::Path::new("/tmp/x.sock"));
        assert!(opts.contains(&"BatchMode=yes".to_string()));
        assert!(opts.contains(&"ControlPath=/tmp/x.sock".to_string()));
    }
}
