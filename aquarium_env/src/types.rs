//! Common types for the aquarium environment abstraction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A record in the shared store: always a JSON object with camelCase keys.
pub type Record = serde_json::Value;

/// Unique identifier for one viewer session.
///
/// Uses UUID v4 for global uniqueness without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Creates a new random SessionId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic SessionId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A change notification delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// The record was created or overwritten; carries the full new value.
    Upserted {
        collection: String,
        id: String,
        record: Record,
    },

    /// The record does not exist (deleted, or absent at subscribe time).
    Removed { collection: String, id: String },
}

impl ChangeEvent {
    /// Returns the collection this event belongs to.
    pub fn collection(&self) -> &str {
        match self {
            Self::Upserted { collection, .. } | Self::Removed { collection, .. } => collection,
        }
    }

    /// Returns the record id.
    pub fn id(&self) -> &str {
        match self {
            Self::Upserted { id, .. } | Self::Removed { id, .. } => id,
        }
    }

    /// Returns the new record value, if any.
    pub fn record(&self) -> Option<&Record> {
        match self {
            Self::Upserted { record, .. } => Some(record),
            Self::Removed { .. } => None,
        }
    }
}

/// Non-destructive shallow merge of `partial` into `base`.
///
/// Top-level keys of `partial` overwrite those of `base`; every other key of
/// `base` survives. A non-object `base` is replaced outright.
pub fn merge_records(base: &mut Record, partial: &Record) {
    match (base.as_object_mut(), partial.as_object()) {
        (Some(target), Some(fields)) => {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
        _ => *base = partial.clone(),
    }
}
