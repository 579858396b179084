use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{info, warn};

use super::{check_exit, CommandRunner, ExitKind};
use crate::error::CommandError;

/// Raw result of a command executed through a [`Session`].
#[derive(Clone, Debug)]
pub struct RawOutput {
    pub exit: ExitKind,
    pub stdout: String,
    pub stderr: String,
}

/// A live connection to one remote host.
#[async_trait]
pub trait Session: Send {
    /// Execute `command`. A broken connection is reported as
    /// [`CommandError::Transport`]; everything else is the command's own
    /// outcome.
    async fn exec(&mut self, command: &str, timeout: Duration) -> Result<RawOutput, CommandError>;

    async fn close(&mut self);
}

/// Opens sessions to remote hosts.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str) -> Result<Box<dyn Session>, CommandError>;
}

/// Runs commands over a lazily established session, reconnecting once
/// when the transport drops mid-command.
pub struct RemoteRunner {
    host: String,
    connector: Box<dyn Connector>,
    session: Option<Box<dyn Session>>,
    online: bool,
    offline_until: Option<Instant>,
    reconnect_cooldown: Duration,
}

impl RemoteRunner {
    pub fn new(
        host: impl Into<String>,
        connector: Box<dyn Connector>,
        reconnect_cooldown: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            connector,
            session: None,
            online: true,
            offline_until: None,
            reconnect_cooldown,
        }
    }

    async fn ensure_session(&mut self) -> Result<&mut Box<dyn Session>, CommandError> {
        if self.session.is_none() {
            match self.connector.connect(&self.host).await {
                Ok(session) => {
                    if !self.online {
                        info!(host = %self.host, "host back online");
                    }
                    self.session = Some(session);
                    self.online = true;
                    self.offline_until = None;
                }
                Err(err) => {
                    warn!(host = %self.host, error = %err, "ssh connection failed, marking offline");
                    self.online = false;
                    self.offline_until = Some(Instant::now() + self.reconnect_cooldown);
                    return Err(err);
                }
            }
        }
        self.session
            .as_mut()
            .ok_or_else(|| CommandError::Offline(self.host.clone()))
    }

    async fn drop_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }

    async fn exec_once(&mut self, command: &str, timeout: Duration) -> Result<String, CommandError> {
        let session = self.ensure_session().await?;
        let raw = session.exec(command, timeout).await?;
        let result = check_exit(command, raw.exit, &raw.stdout, &raw.stderr);
        if let Err(err) = &result {
            warn!(host = %self.host, command, error = %err, "remote command failed");
        }
        result
    }
}

#[async_trait]
impl CommandRunner for RemoteRunner {
    async fn run(&mut self, command: &str, timeout: Duration) -> Result<String, CommandError> {
        if let Some(until) = self.offline_until {
            if Instant::now() < until {
                return Err(CommandError::Offline(self.host.clone()));
            }
        }

        match self.exec_once(command, timeout).await {
            Err(err) if err.is_transport() => {
                warn!(host = %self.host, error = %err, "ssh session dropped, reconnecting");
                self.drop_session().await;
                // One reconnect-and-retry only. A second transport failure
                // leaves the session dropped for the next call to rebuild.
                let retried = self.exec_once(command, timeout).await;
                if matches!(&retried, Err(e) if e.is_transport()) {
                    self.drop_session().await;
                }
                retried
            }
            other => other,
        }
    }

    fn is_online(&self) -> bool {
        self.online
    }

    fn is_local(&self) -> bool {
        false
    }

    async fn close(&mut self) {
        self.drop_session().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    /// Each connect hands out a session that replays the next scripted
    /// outcomes; `false` in the connect script makes that connect fail.
    #[derive(Clone, Default)]
    struct Script {
        connects: Arc<Mutex<Vec<bool>>>,
        execs: Arc<Mutex<Vec<Result<RawOutput, CommandError>>>>,
        connect_calls: Arc<AtomicUsize>,
        exec_calls: Arc<AtomicUsize>,
    }

    struct ScriptSession(Script);

    #[async_trait]
    impl Session for ScriptSession {
        async fn exec(&mut self, _: &str, _: Duration) -> Result<RawOutput, CommandError> {
            self.0.exec_calls.fetch_add(1, Ordering::SeqCst);
            self.0.execs.lock().unwrap().remove(0)
        }

        async fn close(&mut self) {}
    }

    #[async_trait]
    impl Connector for Script {
        async fn connect(&self, host: &str) -> Result<Box<dyn Session>, CommandError> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            let ok = {
                let mut connects = self.connects.lock().unwrap();
                if connects.is_empty() {
                    true
                } else {
                    connects.remove(0)
                }
            };
            if ok {
                Ok(Box::new(ScriptSession(self.clone())))
            } else {
                Err(CommandError::Connect {
                    host: host.to_string(),
                    reason: "refused".into(),
                })
            }
        }
    }

    fn ok(stdout: &str) -> Result<RawOutput, CommandError> {
        Ok(RawOutput {
            exit: ExitKind::Code(0),
            stdout: stdout.into(),
            stderr: String::new(),
        })
    }

    fn dropped() -> Result<RawOutput, CommandError> {
        Err(CommandError::Transport("broken pipe".into()))
    }

    fn runner(script: &Script, cooldown: Duration) -> RemoteRunner {
        RemoteRunner::new("gpu-1", Box::new(script.clone()), cooldown)
    }

    const T: Duration = Duration::from_secs(5);

    #[test(tokio::test)]
    async fn session_is_established_lazily_and_reused() {
        let script = Script::default();
        script.execs.lock().unwrap().extend([ok("a"), ok("b")]);
        let mut runner = runner(&script, Duration::from_secs(30));
        assert_eq!(script.connect_calls.load(Ordering::SeqCst), 0);

        assert_eq!(runner.run("x", T).await.unwrap(), "a");
        assert_eq!(runner.run("y", T).await.unwrap(), "b");
        assert_eq!(script.connect_calls.load(Ordering::SeqCst), 1);
    }

    #[test(tokio::test)]
    async fn transport_error_reconnects_and_retries_once() {
        let script = Script::default();
        script.execs.lock().unwrap().extend([dropped(), ok("recovered")]);
        let mut runner = runner(&script, Duration::from_secs(30));

        assert_eq!(runner.run("x", T).await.unwrap(), "recovered");
        assert_eq!(script.connect_calls.load(Ordering::SeqCst), 2);
        assert_eq!(script.exec_calls.load(Ordering::SeqCst), 2);
        assert!(runner.is_online());
    }

    #[test(tokio::test)]
    async fn failed_reconnect_is_not_retried_again() {
        let script = Script::default();
        script.connects.lock().unwrap().extend([true, false]);
        script.execs.lock().unwrap().push(dropped());
        let mut runner = runner(&script, Duration::from_secs(30));

        let err = runner.run("x", T).await.unwrap_err();
        assert!(matches!(err, CommandError::Connect { .. }));
        assert_eq!(script.connect_calls.load(Ordering::SeqCst), 2);
        assert_eq!(script.exec_calls.load(Ordering::SeqCst), 1);
        assert!(!runner.is_online());
    }

    #[test(tokio::test)]
    async fn second_transport_failure_gives_up() {
        let script = Script::default();
        script.execs.lock().unwrap().extend([dropped(), dropped()]);
        let mut runner = runner(&script, Duration::from_secs(30));

        assert!(runner.run("x", T).await.unwrap_err().is_transport());
        assert_eq!(script.exec_calls.load(Ordering::SeqCst), 2);
    }

    #[test(tokio::test(start_paused = true))]
    async fn offline_host_short_circuits_until_cooldown_elapses() {
        let script = Script::default();
        script.connects.lock().unwrap().push(false);
        script.execs.lock().unwrap().push(ok("back"));
        let mut runner = runner(&script, Duration::from_secs(30));

        assert!(matches!(
            runner.run("x", T).await.unwrap_err(),
            CommandError::Connect { .. }
        ));
        assert!(matches!(
            runner.run("x", T).await.unwrap_err(),
            CommandError::Offline(_)
        ));
        assert_eq!(script.connect_calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(runner.run("x", T).await.unwrap(), "back");
        assert_eq!(script.connect_calls.load(Ordering::SeqCst), 2);
        assert!(runner.is_online());
    }

    #[test(tokio::test)]
    async fn command_failure_is_not_retried() {
        let script = Script::default();
        script.execs.lock().unwrap().push(Ok(RawOutput {
            exit: ExitKind::Code(2),
            stdout: String::new(),
            stderr: "bad".into(),
        }));
        let mut runner = runner(&script, Duration::from_secs(30));

        assert!(matches!(
            runner.run("x", T).await.unwrap_err(),
            CommandError::Failed { .. }
        ));
        assert_eq!(script.exec_calls.load(Ordering::SeqCst), 1);
        assert_eq!(script.connect_calls.load(Ordering::SeqCst), 1);
    }
}
