//! Session configuration.
//!
//! Everything tunable lives in [`SessionConfig`]; it deserializes from JSON
//! with every field optional, so a config file only names what it changes.

use crate::behavior::BehaviorConfig;
use crate::bounds::Bounds;
use crate::error::AquariumError;
use crate::flocking::FlockingConfig;
use crate::integrator::IntegratorConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Authority election parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ElectionConfig {
    /// Collection holding the single owner record
    pub collection: String,

    /// Id of the owner record
    pub record_id: String,

    /// How often the owner refreshes `lastHeartbeat`
    pub heartbeat_interval_ms: u64,

    /// Heartbeat age after which an owner is considered gone
    pub stale_after_ms: u64,

    /// Minimum spacing between two claim attempts by one session
    pub claim_retry_ms: u64,

    /// Sleep between iterations of the background election loop
    pub poll_interval_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            collection: "aquarium_owner".to_string(),
            record_id: "owner".to_string(),
            heartbeat_interval_ms: 5_000,
            stale_after_ms: 15_000,
            claim_retry_ms: 1_000,
            poll_interval_ms: 250,
        }
    }
}

impl ElectionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn claim_retry(&self) -> Duration {
        Duration::from_millis(self.claim_retry_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Replication channel parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReplicationConfig {
    /// Collection of per-fish snapshot records
    pub collection: String,

    /// Minimum spacing between two successful publishes
    pub publish_interval_ms: u64,

    /// Follower convergence rate toward the latest snapshot (1/s)
    pub interpolation_rate: f64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            collection: "fish_state".to_string(),
            publish_interval_ms: 100,
            interpolation_rate: 10.0,
        }
    }
}

impl ReplicationConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }
}

/// Configuration for one viewer session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Seed for the simulation RNG and spawn jitter
    pub seed: u64,

    pub bounds: Bounds,
    pub flocking: FlockingConfig,
    pub integrator: IntegratorConfig,
    pub behavior: BehaviorConfig,
    pub election: ElectionConfig,
    pub replication: ReplicationConfig,

    /// Collection of fish definitions
    pub catalog_collection: String,

    /// Longest frame step simulated in one tick (seconds)
    pub max_dt: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            bounds: Bounds::default(),
            flocking: FlockingConfig::default(),
            integrator: IntegratorConfig::default(),
            behavior: BehaviorConfig::default(),
            election: ElectionConfig::default(),
            replication: ReplicationConfig::default(),
            catalog_collection: "fish".to_string(),
            max_dt: 0.1,
        }
    }
}

impl SessionConfig {
    /// Parses and validates a JSON config.
    pub fn from_json(json: &str) -> Result<Self, AquariumError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), AquariumError> {
        self.bounds.validate().map_err(AquariumError::Config)?;

        if !(self.max_dt.is_finite() && self.max_dt > 0.0) {
            return Err(AquariumError::Config(format!("maxDt must be positive, got {}", self.max_dt)));
        }
        if self.election.heartbeat_interval_ms == 0 {
            return Err(AquariumError::Config("heartbeatIntervalMs must be non-zero".into()));
        }
        if self.election.stale_after_ms <= self.election.heartbeat_interval_ms {
            return Err(AquariumError::Config(format!(
                "staleAfterMs ({}) must exceed heartbeatIntervalMs ({})",
                self.election.stale_after_ms, self.election.heartbeat_interval_ms
            )));
        }
        let (lo, hi) = self.integrator.speed_variation;
        if !(0.0 <= lo && lo <= hi) {
            return Err(AquariumError::Config(format!("invalid speedVariation ({}, {})", lo, hi)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.election.stale_after_ms, 3 * config.election.heartbeat_interval_ms);
        assert_eq!(config.replication.publish_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_json_overrides_defaults() {
        let config = SessionConfig::from_json(
            r#"{ "seed": 7, "bounds": { "x": 5.0, "yMin": -1.0, "yMax": 1.0, "z": 2.0 },
                 "election": { "heartbeatIntervalMs": 1000, "staleAfterMs": 4000 } }"#,
        )
        .unwrap();

        assert_eq!(config.seed, 7);
        assert_eq!(config.bounds.x, 5.0);
        assert_eq!(config.election.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(config.election.collection, "aquarium_owner");
        assert_eq!(config.flocking.max_force, 0.05);
    }

    #[test]
    fn test_stale_threshold_must_exceed_heartbeat() {
        let err = SessionConfig::from_json(r#"{ "election": { "staleAfterMs": 10 } }"#).unwrap_err();
        assert!(matches!(err, AquariumError::Config(_)));
    }

    #[test]
    fn test_malformed_json_is_decode_error() {
        let err = SessionConfig::from_json("{ seed: ").unwrap_err();
        assert!(matches!(err, AquariumError::Decode(_)));
    }
}
