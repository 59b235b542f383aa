//! Error types for the aquarium environment abstraction.

use thiserror::Error;

/// Errors that can occur talking to the shared state store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The store could not be reached (offline, partitioned, timed out)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the write
    #[error("Write rejected: {0}")]
    Rejected(String),

    /// Record serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The backend does not implement an optional operation
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// Storage backend failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// The store has been shut down
    #[error("Store closed")]
    Closed,
}

impl StoreError {
    /// Creates an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Creates a rejected-write error.
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Returns true for failures that the next scheduled attempt may not hit.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Rejected(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        Self::Backend(err.to_string())
    }
}
