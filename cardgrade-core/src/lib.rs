//! # cardgrade-core
//!
//! Layered configuration and tracing setup shared by the cardgrade tools.

pub mod config;
pub mod logging;

pub use config::{
    CardgradeConfig, FetcherConfig, LoggingConfig, PretrainedConfig, TrainerConfig, load_config,
};
pub use logging::init_tracing;
