//! JSON exporter for offline inspection.
//!
//! Exports simulation frames as JSON: every session's view of the tank, so
//! owner and follower trajectories can be compared side by side.

use crate::world::SimWorld;
use aquarium_core::{mean_speed, BehaviorCensus, BehaviorMode, Fish, Role};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// The single owner this frame, if there is exactly one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Each alive session's view
    pub sessions: Vec<SessionFrame>,

    /// Events (crashes, partitions, purchases, etc.)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

impl SimFrame {
    /// Captures the world as it is now.
    pub fn capture(world: &SimWorld, events: Vec<SimEvent>) -> Self {
        let owners = world.owners();
        Self {
            time_sec: world.time(),
            owner: match owners.as_slice() {
                [one] => Some(one.to_string()),
                _ => None,
            },
            sessions: world
                .alive()
                .map(|handle| {
                    let fishes = handle.session.fishes();
                    SessionFrame {
                        session_id: handle.id.to_string(),
                        role: handle.session.role(),
                        census: BehaviorCensus::of(fishes),
                        mean_speed: mean_speed(fishes),
                        owner_ratio: handle.session.metrics().owner_ratio(),
                        fish: fishes.iter().map(FishPosition::new).collect(),
                    }
                })
                .collect(),
            events,
        }
    }
}

/// One session's fish.
#[derive(Debug, Clone, Serialize)]
pub struct SessionFrame {
    pub session_id: String,
    pub role: Role,
    pub census: BehaviorCensus,
    pub mean_speed: f64,
    /// Share of this session's ticks so far spent as owner
    pub owner_ratio: f64,
    pub fish: Vec<FishPosition>,
}

/// Position of a fish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FishPosition {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub behavior: String,
}

impl FishPosition {
    pub fn new(fish: &Fish) -> Self {
        let behavior = match fish.behavior {
            BehaviorMode::Cruising => "cruising",
            BehaviorMode::Idling { .. } => "idling",
            BehaviorMode::Darting { .. } => "darting",
        };
        Self {
            id: fish.id.clone(),
            x: fish.position.x,
            y: fish.position.y,
            z: fish.position.z,
            behavior: behavior.to_string(),
        }
    }
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: Some("warn".to_string()),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    /// Owner at the end of the run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_owner: Option<String>,

    /// Invariant violations and failed checks
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            final_owner: None,
            failures: Vec::new(),
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, final_owner: Option<String>, failures: Vec<String>) {
        self.passed = passed;
        self.final_owner = final_owner;
        self.failures = failures;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::SimConfig;

    #[tokio::test]
    async fn test_frame_lists_every_session() {
        let mut world = SimWorld::new(SimConfig {
            sessions: 2,
            fish: 3,
            ..Default::default()
        });
        world.seed_catalog().await.unwrap();
        world.spawn_sessions();
        for _ in 0..30 {
            world.step().await;
        }

        let frame = SimFrame::capture(&world, vec![SimEvent::info("checkpoint")]);
        assert_eq!(frame.sessions.len(), 2);
        assert!(frame.sessions.iter().all(|s| s.fish.len() == 3));
        assert!(frame.sessions.iter().all(|s| s.census.total() == 3));
        let owner_ratio: f64 = frame.sessions.iter().map(|s| s.owner_ratio).sum();
        assert!(owner_ratio > 0.0 && owner_ratio <= 2.0);

        let mut export = SimExport::new("solo_claim", 42);
        export.add_frame(frame);
        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["frames"][0]["events"][0]["message"], "checkpoint");
        assert!(json["frames"][0]["sessions"][0]["census"]["cruising"].is_u64());
        assert!(json.get("failures").is_none());
    }
}
