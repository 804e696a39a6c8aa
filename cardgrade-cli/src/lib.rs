//! Shared startup for the cardgrade binaries.

use cardgrade_core::{CardgradeConfig, init_tracing, load_config};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;

/// Everything a binary needs before doing its work.
pub struct Startup {
    pub config: CardgradeConfig,
    /// Flushes file logs on drop; keep alive until exit.
    pub log_guard: Option<WorkerGuard>,
}

/// Load `.env`, resolve configuration against the current directory, and
/// install tracing under `app_name`.
pub fn startup(app_name: &str) -> anyhow::Result<Startup> {
    let _ = dotenvy::dotenv();

    let workspace = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config = load_config(Some(&workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    let log_guard = init_tracing(&config.logging, app_name);

    tracing::debug!(workspace = %workspace.display(), "Configuration loaded");
    Ok(Startup { config, log_guard })
}
