//! Behavior state machine: cruising, idling and darting.
//!
//! ```text
//!            p = 0.002·dt/frame              timer ≤ 0
//!   Cruising ───────────────────► Idling ───────────────► Cruising
//!      │
//!      │ p = dart·0.01·dt/frame              timer ≤ 0
//!      └────────────────────────► Darting ──────────────► Cruising
//! ```
//!
//! Transition probabilities scale with elapsed time so behavior frequency
//! does not depend on frame rate. There is no terminal state.

use crate::fish::Personality;
use crate::rng::Lcg;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Current mode of a fish, with the time left in non-cruising modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum BehaviorMode {
    #[default]
    Cruising,
    Idling { remaining: f64 },
    Darting { remaining: f64 },
}

impl BehaviorMode {
    pub fn is_cruising(&self) -> bool {
        matches!(self, Self::Cruising)
    }

    pub fn is_idling(&self) -> bool {
        matches!(self, Self::Idling { .. })
    }

    pub fn is_darting(&self) -> bool {
        matches!(self, Self::Darting { .. })
    }
}

/// Tuning for the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BehaviorConfig {
    /// Reference frame duration the probabilities are expressed against
    pub frame_ref: f64,

    /// Chance per reference frame of starting to idle
    pub idle_chance: f64,

    /// Multiplier on `Personality::dart_probability` per reference frame
    pub dart_scale: f64,

    /// Idle duration range in seconds `[min, max)`
    pub idle_duration: (f64, f64),

    /// Dart duration range in seconds `[min, max)`
    pub dart_duration: (f64, f64),

    /// Velocity multiplier applied every idle tick
    pub idle_decay: f64,

    /// Per-axis half-width of the dart impulse
    pub dart_impulse: f64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            frame_ref: 1.0 / 60.0,
            idle_chance: 0.002,
            dart_scale: 0.01,
            idle_duration: (1.0, 3.0),
            dart_duration: (0.3, 0.8),
            idle_decay: 0.95,
            dart_impulse: 0.25,
        }
    }
}

/// Advances the state machine by `dt` seconds.
///
/// A timer reaching zero returns the fish to `Cruising` in the same call; the
/// fish then moves as a cruiser for that tick.
pub fn advance(
    mode: BehaviorMode,
    personality: &Personality,
    dt: f64,
    rng: &mut Lcg,
    config: &BehaviorConfig,
) -> BehaviorMode {
    match mode {
        BehaviorMode::Idling { remaining } => {
            let remaining = remaining - dt;
            if remaining <= 0.0 {
                BehaviorMode::Cruising
            } else {
                BehaviorMode::Idling { remaining }
            }
        }
        BehaviorMode::Darting { remaining } => {
            let remaining = remaining - dt;
            if remaining <= 0.0 {
                BehaviorMode::Cruising
            } else {
                BehaviorMode::Darting { remaining }
            }
        }
        BehaviorMode::Cruising => {
            let frames = dt / config.frame_ref;

            if rng.chance(config.idle_chance * frames) {
                let (lo, hi) = config.idle_duration;
                BehaviorMode::Idling {
                    remaining: rng.range(lo, hi),
                }
            } else if rng.chance(personality.dart_probability * config.dart_scale * frames) {
                let (lo, hi) = config.dart_duration;
                BehaviorMode::Darting {
                    remaining: rng.range(lo, hi),
                }
            } else {
                BehaviorMode::Cruising
            }
        }
    }
}

/// Folds this tick's flocking force into `velocity` according to the mode.
///
/// Idling discards the force and only decays; darting layers a random
/// impulse on top of the force.
pub fn apply(
    mode: &BehaviorMode,
    velocity: &mut Vector3<f64>,
    force: &Vector3<f64>,
    rng: &mut Lcg,
    config: &BehaviorConfig,
) {
    match mode {
        BehaviorMode::Cruising => *velocity += force,
        BehaviorMode::Idling { .. } => *velocity *= config.idle_decay,
        BehaviorMode::Darting { .. } => {
            let k = config.dart_impulse;
            let impulse = Vector3::new(rng.range(-k, k), rng.range(-k, k), rng.range(-k, k));
            *velocity += force + impulse;
        }
    }
}
