use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single command against a single host.
///
/// None of these are fatal to a fleet-wide operation; the node that hit
/// the error reports failure for that call only.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("command exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("remote transport failed: {0}")]
    Transport(String),

    #[error("could not establish session to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("host {0} is offline")]
    Offline(String),
}

impl CommandError {
    /// Errors that mean the session is gone rather than the command failing.
    pub fn is_transport(&self) -> bool {
        matches!(self, CommandError::Transport(_))
    }
}

/// A telemetry poll that produced nothing usable.
#[derive(Error, Debug)]
pub enum SampleError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("none of {lines} telemetry lines could be parsed")]
    Unparseable { lines: usize },
}

/// A telemetry line that could not be turned into a GPU record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("expected 7 fields, got {0}")]
    FieldCount(usize),

    #[error("field `{field}` is not a valid number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("memory used ({used} MiB) exceeds total ({total} MiB)")]
    MemoryOverflow { used: u64, total: u64 },

    #[error("negative power draw: {0}")]
    NegativePower(f64),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("guard interval must be between 1 and {max} minutes, got {got}")]
    Interval { got: u32, max: u32 },

    #[error("power threshold must be a finite, non-negative number of watts, got {0}")]
    Threshold(f64),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {key}: {value:?}")]
    Env { key: &'static str, value: String },

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

#[derive(Error, Debug)]
pub enum HostListError {
    #[error("failed to read host list {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
