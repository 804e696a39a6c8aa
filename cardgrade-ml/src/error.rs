//! Error types for the cardgrade-ml crate.

use thiserror::Error;

/// Top-level error type for ML operations.
#[derive(Debug, Error)]
pub enum MlError {
    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Hub error: {0}")]
    Hub(#[from] hf_hub::api::sync::ApiError),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl MlError {
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, MlError>;
