//! Tracing setup shared by the cardgrade binaries.
//!
//! Human-readable output goes to stderr; when enabled, a JSON copy of every
//! event is appended to a daily rolling file under the per-user data dir.

use crate::config::{LoggingConfig, project_dirs};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Directory holding the JSON log files.
pub fn log_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.level`. The returned guard flushes the file
/// writer on drop and must be held for the life of the process.
pub fn init_tracing(config: &LoggingConfig, app_name: &str) -> Option<WorkerGuard> {
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    if !config.file {
        tracing_subscriber::registry().with(stderr_layer).init();
        return None;
    }

    let dir = log_dir();
    let _ = std::fs::create_dir_all(&dir);
    let file_appender = tracing_appender::rolling::daily(&dir, format!("{app_name}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    Some(guard)
}
