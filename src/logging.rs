//! provides logging helpers

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::{prelude::*, registry};

const LOG_PREFIX: &str = "gpu-guard.log";

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// initiate the global tracing subscriber, writing to stderr
pub fn init_stderr() {
    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter());
    registry().with(fmt_layer).init();
}

/// initiate the global tracing subscriber, writing to a daily rolling file
/// under `dir`. The terminal belongs to the dashboard, so nothing goes to
/// stdout or stderr unless the file cannot be created.
pub fn init_file(dir: &Path) -> WorkerGuard {
    let (writer, guard) = match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .max_log_files(7)
        .build(dir)
    {
        Ok(appender) => tracing_appender::non_blocking(appender),
        Err(err) => {
            eprintln!(
                "failed to create log file under {}: {err}; logging to stderr",
                dir.display()
            );
            tracing_appender::non_blocking(std::io::stderr())
        }
    };

    let fmt_layer = layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_filter(env_filter());
    registry().with(fmt_layer).init();
    guard
}
