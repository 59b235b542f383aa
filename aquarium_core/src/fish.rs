//! Fish: per-agent kinematic, display and personality state.

use crate::behavior::BehaviorMode;
use crate::bounds::Bounds;
use crate::catalog::FishDefinition;
use crate::rng::Lcg;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Half-width of the box around the catalog position used for spawn jitter.
pub const SPAWN_POSITION_JITTER: f64 = 1.0;

/// Half-width of the per-axis spawn velocity.
pub const SPAWN_VELOCITY_JITTER: f64 = 0.5;

/// Per-fish water resistance, compounded with the global damping.
pub const FISH_DAMPING: f64 = 0.98;

/// Fixed weights shaping how a fish flocks and wanders.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Personality {
    pub alignment: f64,
    pub cohesion: f64,
    pub wander: f64,
    pub dart_probability: f64,
}

/// The archetypes personalities are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Archetype {
    /// Sticks to the group
    Schooler,
    /// Drifts off to look around
    Explorer,
    /// Darts often
    Skittish,
    /// Keeps to itself
    Loner,
}

impl Archetype {
    pub const ALL: [Archetype; 4] = [
        Archetype::Schooler,
        Archetype::Explorer,
        Archetype::Skittish,
        Archetype::Loner,
    ];

    /// Deterministic assignment by catalog slot.
    pub fn for_slot(slot: u64) -> Self {
        Self::ALL[(slot % Self::ALL.len() as u64) as usize]
    }

    pub fn personality(self) -> Personality {
        match self {
            Archetype::Schooler => Personality {
                alignment: 1.2,
                cohesion: 1.1,
                wander: 0.3,
                dart_probability: 0.2,
            },
            Archetype::Explorer => Personality {
                alignment: 0.7,
                cohesion: 0.6,
                wander: 0.9,
                dart_probability: 0.5,
            },
            Archetype::Skittish => Personality {
                alignment: 0.9,
                cohesion: 0.8,
                wander: 0.5,
                dart_probability: 1.5,
            },
            Archetype::Loner => Personality {
                alignment: 0.4,
                cohesion: 0.3,
                wander: 0.7,
                dart_probability: 0.3,
            },
        }
    }
}

/// Reproducible offsets applied when a fish enters the tank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnJitter {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
}

impl SpawnJitter {
    /// Draws the jitter for catalog `slot` from the session seed.
    ///
    /// Every session seeded alike computes the same offsets for the same
    /// slot, so a fish appears in the same place everywhere.
    pub fn for_slot(seed: u64, slot: u64) -> Self {
        let mut rng = Lcg::derive(seed, slot);
        let position = Vector3::new(
            rng.range(-SPAWN_POSITION_JITTER, SPAWN_POSITION_JITTER),
            rng.range(-SPAWN_POSITION_JITTER, SPAWN_POSITION_JITTER),
            rng.range(-SPAWN_POSITION_JITTER, SPAWN_POSITION_JITTER),
        );
        let velocity = Vector3::new(
            rng.range(-SPAWN_VELOCITY_JITTER, SPAWN_VELOCITY_JITTER),
            rng.range(-SPAWN_VELOCITY_JITTER, SPAWN_VELOCITY_JITTER),
            rng.range(-SPAWN_VELOCITY_JITTER, SPAWN_VELOCITY_JITTER),
        );
        Self { position, velocity }
    }
}

/// One simulated fish.
#[derive(Debug, Clone)]
pub struct Fish {
    /// Stable id shared with the catalog
    pub id: String,

    /// Catalog slot (ordering, archetype and spawn jitter)
    pub slot: u64,

    pub name: String,
    pub species: String,
    pub color: String,
    pub size: f64,

    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,

    /// Facing, derived from velocity after each integration step
    pub orientation: UnitQuaternion<f64>,

    /// Nominal cruising speed (units/s)
    pub base_speed: f64,

    /// Speed cap drawn for the current tick
    pub max_speed: f64,

    /// Per-fish water resistance
    pub damping: f64,

    pub personality: Personality,
    pub behavior: BehaviorMode,

    /// Catalog-provided initial position (follower fallback pose)
    pub home: Vector3<f64>,
}

impl Fish {
    /// Builds a fish from its catalog definition, applying spawn jitter and
    /// keeping the result inside `bounds`.
    pub fn spawn(definition: &FishDefinition, seed: u64, bounds: &Bounds) -> Self {
        let home = bounds.clamp(&Vector3::from(definition.position), 0.5);
        let jitter = SpawnJitter::for_slot(seed, definition.slot);

        Self {
            position: bounds.clamp(&(home + jitter.position), 0.5),
            velocity: jitter.velocity,
            ..Self::at_rest(definition, home)
        }
    }

    /// Builds a fish parked at `home` with zero velocity.
    pub fn at_rest(definition: &FishDefinition, home: Vector3<f64>) -> Self {
        Self {
            id: definition.id.clone(),
            slot: definition.slot,
            name: definition.name.clone(),
            species: definition.species.clone(),
            color: definition.color.clone(),
            size: definition.size,
            position: home,
            velocity: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            base_speed: definition.base_speed,
            max_speed: definition.base_speed,
            damping: FISH_DAMPING,
            personality: Archetype::for_slot(definition.slot).personality(),
            behavior: BehaviorMode::Cruising,
            home,
        }
    }

    /// Current speed.
    pub fn speed(&self) -> f64 {
        self.velocity.norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(slot: u64, position: [f64; 3]) -> FishDefinition {
        FishDefinition {
            slot,
            position,
            ..FishDefinition::new("f0", "Bubbles", "clownfish")
        }
    }

    #[test]
    fn test_archetypes_cycle_by_slot() {
        assert_eq!(Archetype::for_slot(0), Archetype::Schooler);
        assert_eq!(Archetype::for_slot(5), Archetype::Explorer);
        assert_eq!(Archetype::for_slot(7), Archetype::Loner);
    }

    #[test]
    fn test_spawn_jitter_reproducible_per_seed() {
        let a = SpawnJitter::for_slot(42, 0);
        let b = SpawnJitter::for_slot(42, 0);
        let c = SpawnJitter::for_slot(43, 0);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.position.iter().all(|v| v.abs() <= SPAWN_POSITION_JITTER));
        assert!(a.velocity.iter().all(|v| v.abs() <= SPAWN_VELOCITY_JITTER));
    }

    #[test]
    fn test_spawn_stays_inside_bounds() {
        let bounds = Bounds::default();
        let fish = Fish::spawn(&definition(3, [500.0, -500.0, 0.0]), 42, &bounds);

        assert!(bounds.contains(&fish.position));
        assert!(bounds.contains(&fish.home));
        assert_eq!(fish.personality, Archetype::Loner.personality());
    }

    #[test]
    fn test_at_rest_has_zero_velocity() {
        let def = definition(0, [1.0, 2.0, 3.0]);
        let fish = Fish::at_rest(&def, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(fish.velocity, Vector3::zeros());
        assert_eq!(fish.position, Vector3::new(1.0, 2.0, 3.0));
    }
}
