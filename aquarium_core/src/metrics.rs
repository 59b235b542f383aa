//! Session Metrics
//! ===============
//!
//! Cheap counters and per-tick aggregates a session keeps about itself:
//! - **Role split**: ticks spent simulating vs mirroring
//! - **Replication health**: publishes, throttled ticks and dropped writes
//! - **Behavior census**: how many fish cruise, idle or dart right now

use crate::fish::Fish;
use serde::Serialize;

/// Counts of fish per behavior mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorCensus {
    pub cruising: usize,
    pub idling: usize,
    pub darting: usize,
}

impl BehaviorCensus {
    pub fn of(fishes: &[Fish]) -> Self {
        fishes.iter().fold(Self::default(), |mut census, fish| {
            if fish.behavior.is_idling() {
                census.idling += 1;
            } else if fish.behavior.is_darting() {
                census.darting += 1;
            } else {
                census.cruising += 1;
            }
            census
        })
    }

    pub fn total(&self) -> usize {
        self.cruising + self.idling + self.darting
    }
}

/// Mean speed over a school; 0 for an empty tank.
pub fn mean_speed(fishes: &[Fish]) -> f64 {
    if fishes.is_empty() {
        return 0.0;
    }
    fishes.iter().map(Fish::speed).sum::<f64>() / fishes.len() as f64
}

/// Running counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub ticks: u64,
    pub owner_ticks: u64,
    pub follower_ticks: u64,
    /// Ticks skipped because `dt` was not usable
    pub skipped_ticks: u64,
    pub publishes: u64,
    pub throttled: u64,
    pub publish_failures: u64,
    pub fish_added: u64,
    pub fish_removed: u64,
    pub role_changes: u64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share of simulated ticks spent as owner, in `[0, 1]`.
    pub fn owner_ratio(&self) -> f64 {
        let active = self.owner_ticks + self.follower_ticks;
        if active == 0 {
            0.0
        } else {
            self.owner_ticks as f64 / active as f64
        }
    }
}
