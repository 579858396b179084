//! Layered configuration: defaults, then an optional YAML file, then
//! environment variables. CLI flags are applied last by the binary.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::models::{GuardPolicy, PolicyDocument};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FleetConfig {
    pub host_file: PathBuf,
    pub refresh_interval_secs: u64,
    pub command_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub reconnect_cooldown_secs: u64,
    pub max_concurrency: usize,
    pub auto_guard: bool,
    /// Replace the host list with this many simulated hosts.
    pub simulate: Option<usize>,
    pub guard: GuardConfig,
    pub policy: PolicyDocument,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            host_file: PathBuf::from("all.host"),
            refresh_interval_secs: 5,
            command_timeout_secs: 30,
            connect_timeout_secs: 5,
            reconnect_cooldown_secs: 30,
            max_concurrency: 16,
            auto_guard: false,
            simulate: None,
            guard: GuardConfig::default(),
            policy: GuardPolicy::default().into(),
        }
    }
}

/// How the guard process is launched on each host.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardConfig {
    /// Directory on the target host containing the launch script.
    pub script_dir: PathBuf,
    pub script: String,
    /// Per-host logs go to `<log_root>/<hostname>/gpu_guard.log`.
    pub log_root: PathBuf,
    pub settle_delay_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            script_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            script: "start_task.sh".to_string(),
            log_root: PathBuf::from("./tmp"),
            settle_delay_ms: 1000,
        }
    }
}

impl FleetConfig {
    /// Defaults, overlaid with `path` when given, then with the environment.
    /// The policy is not validated here; command-line flags still apply on
    /// top, so callers check [`FleetConfig::policy`] once all layers are in.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `GPU_GUARD_*` overrides read through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("GPU_GUARD_HOSTS") {
            self.host_file = PathBuf::from(v);
        }
        if let Some(v) = lookup("GPU_GUARD_SCRIPT_DIR") {
            self.guard.script_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("GPU_GUARD_LOG_ROOT") {
            self.guard.log_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("GPU_GUARD_INTERVAL_MINUTES") {
            self.policy.guard_interval_minutes = parse_env("GPU_GUARD_INTERVAL_MINUTES", v)?;
        }
        if let Some(v) = lookup("GPU_GUARD_POWER_THRESHOLD") {
            self.policy.active_power_threshold = parse_env("GPU_GUARD_POWER_THRESHOLD", v)?;
        }
        if let Some(v) = lookup("GPU_GUARD_REFRESH_SECS") {
            self.refresh_interval_secs = parse_env("GPU_GUARD_REFRESH_SECS", v)?;
        }
        if self.max_concurrency == 0 {
            warn!("max_concurrency of 0 would stall every fleet operation, using 1");
            self.max_concurrency = 1;
        }
        Ok(())
    }

    pub fn policy(&self) -> Result<GuardPolicy, ConfigError> {
        Ok(GuardPolicy::try_from(self.policy.clone())?)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_secs(self.reconnect_cooldown_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { key, value })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use similar_asserts::assert_eq;

    use super::*;
    use crate::error::PolicyError;

    #[test]
    fn yaml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "host_file: /etc/volcano/all.host\n\
             max_concurrency: 4\n\
             guard:\n  script_dir: /opt/guard\n  settle_delay_ms: 250\n\
             policy:\n  guard_interval_minutes: 5\n  active_power_threshold: 80"
        )
        .unwrap();

        let config = FleetConfig::from_file(file.path()).unwrap();
        assert_eq!(config.host_file, PathBuf::from("/etc/volcano/all.host"));
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.guard.script_dir, PathBuf::from("/opt/guard"));
        assert_eq!(config.guard.script, "start_task.sh");
        assert_eq!(config.guard.settle_delay_ms, 250);
        assert_eq!(config.refresh_interval_secs, 5);
        let policy = config.policy().unwrap();
        assert_eq!(policy.interval_minutes(), 5);
        assert_eq!(policy.power_threshold_w(), 80.0);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host_fiel: typo").unwrap();
        assert!(matches!(
            FleetConfig::from_file(file.path()),
            Err(ConfigError::Yaml { .. })
        ));
    }

    #[test]
    fn partial_policy_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "policy:\n  guard_interval_minutes: 5").unwrap();
        assert!(FleetConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn env_overrides_and_validation() {
        let env: HashMap<&str, &str> = [
            ("GPU_GUARD_HOSTS", "/tmp/hosts"),
            ("GPU_GUARD_INTERVAL_MINUTES", "15"),
            ("GPU_GUARD_POWER_THRESHOLD", "120.5"),
        ]
        .into_iter()
        .collect();
        let mut config = FleetConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.host_file, PathBuf::from("/tmp/hosts"));
        assert_eq!(config.policy().unwrap().interval_minutes(), 15);
        assert_eq!(config.policy().unwrap().power_threshold_w(), 120.5);

        let mut config = FleetConfig::default();
        let err = config
            .apply_env(|k| (k == "GPU_GUARD_POWER_THRESHOLD").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { key: "GPU_GUARD_POWER_THRESHOLD", .. }));

        let mut config = FleetConfig::default();
        config
            .apply_env(|k| (k == "GPU_GUARD_INTERVAL_MINUTES").then(|| "45".to_string()))
            .unwrap();
        assert!(matches!(
            config.policy(),
            Err(ConfigError::Policy(PolicyError::Interval { got: 45, .. }))
        ));
    }

    #[test]
    fn invalid_file_policy_can_be_fixed_by_a_later_layer() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "policy:\n  guard_interval_minutes: 45\n  active_power_threshold: 100"
        )
        .unwrap();

        let mut config = FleetConfig::load(Some(file.path())).unwrap();
        assert!(matches!(
            config.policy(),
            Err(ConfigError::Policy(PolicyError::Interval { got: 45, .. }))
        ));

        config.policy.guard_interval_minutes = 10;
        assert_eq!(config.policy().unwrap().interval_minutes(), 10);
    }
}
