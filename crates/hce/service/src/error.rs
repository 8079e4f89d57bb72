//! Error types for the card emulation service

use hce_types::AidError;
use thiserror::Error;

/// Service errors
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings store failure
    #[error("Settings store error: {0}")]
    Store(String),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid AID supplied by a caller
    #[error("Invalid AID: {0}")]
    InvalidAid(#[from] AidError),

    /// The event loop has stopped
    #[error("Service runtime is not running")]
    Stopped,
}

impl From<config::ConfigError> for ServiceError {
    fn from(err: config::ConfigError) -> Self {
        ServiceError::Config(err.to_string())
    }
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
