//! Error types for the Dragnet storage layer.

use thiserror::Error;

/// Errors from the control-plane and scan store backends.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend unreachable or handshake failed.
    #[error("store connection failed: {0}")]
    Connection(String),

    /// A command/query against the backend failed.
    #[error("store query failed: {0}")]
    Query(String),

    /// Payload could not be (de)serialised.
    #[error("store serialization failed: {0}")]
    Serialization(String),

    /// A record expected to exist was absent.
    #[error("not found: {key}")]
    NotFound { key: String },
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Query(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
