//! Aquarium Core - replicated flocking simulation
//!
//! One session owns the tank and simulates it; every other session mirrors
//! the owner's published snapshots:
//! 1. **Simulation**: behavior state machine, boids forces and a first-order
//!    integrator that keeps every fish inside the tank
//! 2. **Authority**: a single owner record claimed, heartbeated and taken
//!    over through the shared store
//! 3. **Replication**: throttled snapshot publishing on the owner,
//!    staged and interpolated mirroring on followers

pub mod authority;
pub mod behavior;
pub mod bounds;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fish;
pub mod flocking;
pub mod integrator;
pub mod metrics;
pub mod replication;
pub mod rng;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use authority::{AuthorityElection, AuthorityRecord, ElectionAction, ElectionStats, Observation};
pub use behavior::{BehaviorConfig, BehaviorMode};
pub use bounds::Bounds;
pub use catalog::{
    record_purchase, seed_catalog, starter_catalog, CatalogChange, CatalogStaging, FishDefinition,
    FishSource, PurchaseEvent,
};
pub use config::{ElectionConfig, ReplicationConfig, SessionConfig};
pub use error::AquariumError;
pub use fish::{Archetype, Fish, Personality};
pub use flocking::{FlockingConfig, FlockingEngine};
pub use integrator::IntegratorConfig;
pub use metrics::{mean_speed, BehaviorCensus, SessionMetrics};
pub use replication::{FollowerMirror, PublishOutcome, SnapshotPublisher, SnapshotRecord};
pub use rng::Lcg;
pub use session::{AquariumSession, Role, TickReport};

pub(crate) use aquarium_env::lock;
