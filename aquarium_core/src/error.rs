//! Error types for the aquarium core.

use aquarium_env::StoreError;
use thiserror::Error;

/// Errors surfaced by core operations that talk to the store or decode
/// records. The tick loop itself never returns these; it logs and drops.
#[derive(Debug, Error)]
pub enum AquariumError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Record decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl AquariumError {
    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }
}
