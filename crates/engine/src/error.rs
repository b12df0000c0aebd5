//! Error taxonomy for the anomaly engine
//!
//! Variants map onto how the pipeline reacts to a failure:
//! configuration and schema errors fail the enclosing call, per-reading
//! errors are isolated by the scorer, write errors trigger redelivery and
//! publish errors are only logged.

use thiserror::Error;

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("required columns missing: {missing:?}; available columns: {available:?}")]
    Schema {
        missing: Vec<String>,
        available: Vec<String>,
    },

    #[error("data quality error: {0}")]
    DataQuality(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid message format: {0}")]
    MalformedMessage(String),

    #[error("feature reconstruction failed: {0}")]
    Reconstruction(String),

    #[error("model not found for service: {0}")]
    ModelNotFound(String),

    #[error("model store error: {0}")]
    Store(String),

    #[error("anomaly write failed: {0}")]
    Write(String),

    #[error("anomaly publish failed: {0}")]
    Publish(String),

    #[error("subscriber unavailable: {0}")]
    Unavailable(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// True for failures that will never succeed on redelivery
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            EngineError::MalformedMessage(_)
                | EngineError::Schema { .. }
                | EngineError::Configuration(_)
                | EngineError::DataQuality(_)
                | EngineError::InvalidInput(_)
        )
    }
}
