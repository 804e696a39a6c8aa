//! Configuration system for cardgrade.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/cardgrade/config.toml` and/or
//! `.cardgrade/config.toml` in the workspace directory. The built-in defaults
//! reproduce the fixed behaviour of the tools, so no file is required.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration shared by the cardgrade binaries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardgradeConfig {
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Image fetcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("cardgrade/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Grade classifier training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Image-folder dataset root, one subfolder per grade.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    /// Width of the classification head. PSA grades run 1-10.
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    /// Side length images are resized to before entering the network.
    #[serde(default = "default_image_size")]
    pub image_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Where the final weights are written. Overwritten on every run.
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    #[serde(default)]
    pub pretrained: PretrainedConfig,
    /// Fixes the per-epoch shuffle order. Unseeded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffle_seed: Option<u64>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            batch_size: default_batch_size(),
            epochs: default_epochs(),
            num_classes: default_num_classes(),
            image_size: default_image_size(),
            learning_rate: default_learning_rate(),
            output_path: default_output_path(),
            pretrained: PretrainedConfig::default(),
            shuffle_seed: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("dataset")
}

fn default_batch_size() -> usize {
    16
}

fn default_epochs() -> usize {
    5
}

fn default_num_classes() -> usize {
    10
}

fn default_image_size() -> usize {
    224
}

fn default_learning_rate() -> f64 {
    1e-4
}

fn default_output_path() -> PathBuf {
    PathBuf::from("models/psa_grade_resnet18.safetensors")
}

/// Source of the backbone's pretrained ImageNet weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PretrainedConfig {
    /// When false the backbone starts from random initialisation.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Hugging Face hub repository holding the weights.
    #[serde(default = "default_hub_repo")]
    pub hub_repo: String,
    #[serde(default = "default_hub_file")]
    pub hub_file: String,
    /// Local safetensors file; takes precedence over the hub when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

impl Default for PretrainedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hub_repo: default_hub_repo(),
            hub_file: default_hub_file(),
            local_path: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_hub_repo() -> String {
    "lmz/candle-resnet".to_string()
}

fn default_hub_file() -> String {
    "resnet18.safetensors".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also write JSON logs to the per-user data directory.
    #[serde(default = "default_true")]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Per-user project directories (`~/.config/cardgrade`, `~/.local/share/cardgrade`).
pub fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "cardgrade", "cardgrade")
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `CARDGRADE_`)
/// 3. Workspace-local config (`.cardgrade/config.toml`)
/// 4. User config (`~/.config/cardgrade/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&CardgradeConfig>,
) -> Result<CardgradeConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(CardgradeConfig::default()));

    if let Some(dirs) = project_dirs() {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // CARDGRADE_TRAINER__EPOCHS, CARDGRADE_FETCHER__TIMEOUT_SECS, ...
    figment = figment.merge(Env::prefixed("CARDGRADE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".cardgrade").join("config.toml")
}
