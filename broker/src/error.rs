//! Error types for the broker

use thiserror::Error;

pub use datashare_core::PluginError;

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Main error type for the broker
///
/// Per-message failures are never errors at this level: rejections and
/// drops are reported through the [`DropObserver`](crate::observe::DropObserver)
/// and the pipeline keeps going. `BrokerError` covers setup and lifecycle.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Sink error during setup or shutdown
    #[error("sink '{sink}' error: {message}")]
    Sink { sink: String, message: String },

    /// Feed/source error
    #[error("source '{source_name}' error: {message}")]
    Source {
        source_name: String,
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (ontology files, config documents)
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Metrics error
    #[error("metrics error: {0}")]
    Metrics(String),

    /// The broker is shutting down and no longer accepts input
    #[error("shutdown requested")]
    Shutdown,
}

impl From<PluginError> for BrokerError {
    fn from(err: PluginError) -> Self {
        BrokerError::Sink {
            sink: "unknown".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Serialization(err.to_string())
    }
}
