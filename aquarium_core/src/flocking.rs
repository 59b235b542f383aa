//! Flocking Force Engine.
//!
//! Each fish is steered by five contributions computed against every other
//! fish (O(n²), fine for a few dozen fish):
//!
//! | Force      | Range                 | Magnitude                         |
//! |------------|-----------------------|-----------------------------------|
//! | separation | `separation_distance` | `1.5 · max_force`                 |
//! | alignment  | `alignment_distance`  | ≤ `max_force · alignment`         |
//! | cohesion   | `cohesion_distance`   | ≤ `max_force · cohesion`          |
//! | wander     | -                     | `wander · wander_strength` / axis |
//! | boundary   | `boundary_margin`     | `2 · max_force` / axis            |
//!
//! Neighbor contributions are symmetric sums, so neighbor order does not
//! matter. Forces for a tick are all computed from the pre-tick state.

use crate::bounds::Bounds;
use crate::fish::{Fish, Personality};
use crate::rng::Lcg;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Distances below this are treated as coincident.
const COINCIDENT: f64 = 1e-9;

/// Parameters of the force engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FlockingConfig {
    pub max_force: f64,
    pub separation_distance: f64,
    pub alignment_distance: f64,
    pub cohesion_distance: f64,
    pub wander_strength: f64,

    /// Vertical wander damping (keeps motion mostly horizontal)
    pub vertical_wander: f64,

    /// Distance from a face at which the boundary force kicks in
    pub boundary_margin: f64,
}

impl Default for FlockingConfig {
    fn default() -> Self {
        Self {
            max_force: 0.05,
            separation_distance: 1.5,
            alignment_distance: 3.0,
            cohesion_distance: 4.0,
            wander_strength: 0.04,
            vertical_wander: 0.7,
            boundary_margin: 2.0,
        }
    }
}

/// The individual contributions acting on one fish.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Contributions {
    pub(crate) separation: Vector3<f64>,
    pub(crate) alignment: Vector3<f64>,
    pub(crate) cohesion: Vector3<f64>,
    pub(crate) wander: Vector3<f64>,
    pub(crate) boundary: Vector3<f64>,
}

impl Contributions {
    pub(crate) fn total(&self) -> Vector3<f64> {
        self.separation + self.alignment + self.cohesion + self.wander + self.boundary
    }
}

/// Scales `v` down to at most `max` length.
pub fn limit(v: Vector3<f64>, max: f64) -> Vector3<f64> {
    let n = v.norm();
    if n > max && n > 0.0 {
        v * (max / n)
    } else {
        v
    }
}

/// Computes per-tick steering forces.
///
/// Holds a force buffer that is reused from tick to tick; it only grows when
/// the population does.
#[derive(Debug, Clone)]
pub struct FlockingEngine {
    config: FlockingConfig,
    forces: Vec<Vector3<f64>>,
}

impl FlockingEngine {
    pub fn new(config: FlockingConfig) -> Self {
        Self {
            config,
            forces: Vec::new(),
        }
    }

    pub fn config(&self) -> &FlockingConfig {
        &self.config
    }

    /// Computes the summed force on every fish from the current state.
    ///
    /// Wander draws are taken from `rng` in fish order.
    pub fn compute(&mut self, fishes: &[Fish], bounds: &Bounds, rng: &mut Lcg) -> &[Vector3<f64>] {
        self.forces.resize(fishes.len(), Vector3::zeros());
        for i in 0..fishes.len() {
            let force = self.contributions(i, fishes, bounds, rng).total();
            self.forces[i] = force;
        }
        &self.forces
    }

    /// Breaks down the force on fish `i`.
    pub(crate) fn contributions(
        &self,
        i: usize,
        fishes: &[Fish],
        bounds: &Bounds,
        rng: &mut Lcg,
    ) -> Contributions {
        let cfg = &self.config;
        let me = &fishes[i];

        let mut away = Vector3::zeros();
        let mut separating = 0usize;
        let mut velocity_sum = Vector3::zeros();
        let mut aligning = 0usize;
        let mut position_sum = Vector3::zeros();
        let mut cohering = 0usize;

        for (j, other) in fishes.iter().enumerate() {
            if j == i {
                continue;
            }
            let delta = me.position - other.position;
            let distance = delta.norm();

            if distance > COINCIDENT && distance < cfg.separation_distance {
                away += delta / distance / distance;
                separating += 1;
            }
            if distance < cfg.alignment_distance {
                velocity_sum += other.velocity;
                aligning += 1;
            }
            if distance < cfg.cohesion_distance {
                position_sum += other.position;
                cohering += 1;
            }
        }

        let separation = if separating > 0 {
            away / separating as f64 * (1.5 * cfg.max_force)
        } else {
            Vector3::zeros()
        };

        let alignment = if aligning > 0 {
            let average = velocity_sum / aligning as f64;
            limit(average - me.velocity, cfg.max_force * me.personality.alignment)
        } else {
            Vector3::zeros()
        };

        let cohesion = if cohering > 0 {
            let centroid = position_sum / cohering as f64;
            let desired = centroid - me.position;
            limit(desired - me.velocity, cfg.max_force * me.personality.cohesion)
        } else {
            Vector3::zeros()
        };

        Contributions {
            separation,
            alignment,
            cohesion,
            wander: self.wander(&me.personality, rng),
            boundary: self.boundary(&me.position, bounds),
        }
    }

    /// Independent per-axis random impulse scaled by the wander weight.
    pub(crate) fn wander(&self, personality: &Personality, rng: &mut Lcg) -> Vector3<f64> {
        let k = personality.wander * self.config.wander_strength;
        Vector3::new(
            rng.range(-1.0, 1.0) * k,
            rng.range(-1.0, 1.0) * k * self.config.vertical_wander,
            rng.range(-1.0, 1.0) * k,
        )
    }

    /// Fixed push back toward the centre on every axis within the margin of
    /// a face.
    pub(crate) fn boundary(&self, position: &Vector3<f64>, bounds: &Bounds) -> Vector3<f64> {
        let push = 2.0 * self.config.max_force;
        let margin = self.config.boundary_margin;
        let (lo, hi) = (bounds.min(), bounds.max());

        let mut force = Vector3::zeros();
        for axis in 0..3 {
            if position[axis] > hi[axis] - margin {
                force[axis] = -push;
            } else if position[axis] < lo[axis] + margin {
                force[axis] = push;
            }
        }
        force
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FishDefinition;
    use approx::assert_relative_eq;

    fn fish_at(slot: u64, position: Vector3<f64>, velocity: Vector3<f64>) -> Fish {
        let def = FishDefinition {
            slot,
            ..FishDefinition::new(format!("f{}", slot), "Fish", "tetra")
        };
        let mut fish = Fish::at_rest(&def, position);
        fish.velocity = velocity;
        fish
    }

    fn quiet_engine() -> FlockingEngine {
        FlockingEngine::new(FlockingConfig {
            wander_strength: 0.0,
            ..FlockingConfig::default()
        })
    }

    #[test]
    fn test_lone_fish_in_center_feels_nothing() {
        let engine = quiet_engine();
        let fishes = vec![fish_at(0, Vector3::zeros(), Vector3::new(1.0, 0.0, 0.0))];
        let c = engine.contributions(0, &fishes, &Bounds::default(), &mut Lcg::new(1));
        assert_eq!(c.total(), Vector3::zeros());
    }

    #[test]
    fn test_separation_pushes_apart() {
        let engine = quiet_engine();
        let fishes = vec![
            fish_at(0, Vector3::new(0.0, 0.0, 0.0), Vector3::zeros()),
            fish_at(1, Vector3::new(1.0, 0.0, 0.0), Vector3::zeros()),
        ];
        let c = engine.contributions(0, &fishes, &Bounds::default(), &mut Lcg::new(1));

        // unit vector (-1,0,0) / distance 1, one neighbor, times 1.5 * 0.05
        assert_relative_eq!(c.separation.x, -0.075, epsilon = 1e-12);
        assert_eq!(c.separation.y, 0.0);
    }

    #[test]
    fn test_coincident_neighbors_do_not_separate() {
        let engine = quiet_engine();
        let fishes = vec![
            fish_at(0, Vector3::zeros(), Vector3::zeros()),
            fish_at(1, Vector3::zeros(), Vector3::zeros()),
        ];
        let c = engine.contributions(0, &fishes, &Bounds::default(), &mut Lcg::new(1));
        assert!(c.separation.iter().all(|v| v.is_finite()));
        assert_eq!(c.separation, Vector3::zeros());
    }

    #[test]
    fn test_alignment_is_clamped_by_personality() {
        let engine = quiet_engine();
        let fishes = vec![
            fish_at(0, Vector3::zeros(), Vector3::zeros()),
            fish_at(1, Vector3::new(2.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 10.0)),
        ];
        let c = engine.contributions(0, &fishes, &Bounds::default(), &mut Lcg::new(1));

        let cap = 0.05 * fishes[0].personality.alignment;
        assert_relative_eq!(c.alignment.norm(), cap, epsilon = 1e-12);
        assert!(c.alignment.z > 0.0);
    }

    #[test]
    fn test_cohesion_steers_toward_centroid() {
        let engine = quiet_engine();
        let fishes = vec![
            fish_at(0, Vector3::zeros(), Vector3::zeros()),
            fish_at(1, Vector3::new(3.5, 0.0, 0.0), Vector3::zeros()),
        ];
        let c = engine.contributions(0, &fishes, &Bounds::default(), &mut Lcg::new(1));
        assert!(c.cohesion.x > 0.0);
        assert!(c.cohesion.norm() <= 0.05 * fishes[0].personality.cohesion + 1e-12);
    }

    #[test]
    fn test_boundary_pushes_back_near_faces() {
        let engine = quiet_engine();
        let bounds = Bounds::default();
        let f = engine.boundary(&Vector3::new(17.0, -11.0, 0.0), &bounds);
        assert_eq!(f, Vector3::new(-0.1, 0.1, 0.0));
    }

    #[test]
    fn test_wander_vertical_is_damped() {
        let engine = FlockingEngine::new(FlockingConfig::default());
        let personality = crate::fish::Archetype::Explorer.personality();
        let mut rng = Lcg::new(11);
        let k = personality.wander * 0.04;
        for _ in 0..1000 {
            let w = engine.wander(&personality, &mut rng);
            assert!(w.x.abs() <= k && w.z.abs() <= k);
            assert!(w.y.abs() <= k * 0.7);
        }
    }

    #[test]
    fn test_neighbor_order_does_not_matter() {
        let engine = quiet_engine();
        let bounds = Bounds::default();
        let me = fish_at(0, Vector3::zeros(), Vector3::new(0.2, 0.0, 0.0));
        let a = fish_at(1, Vector3::new(1.0, 0.5, 0.0), Vector3::new(0.0, 1.0, 0.0));
        let b = fish_at(2, Vector3::new(-0.7, 0.0, 1.2), Vector3::new(1.0, 0.0, -1.0));
        let c = fish_at(3, Vector3::new(0.0, -2.0, 0.3), Vector3::new(0.5, 0.5, 0.5));

        let forward = vec![me.clone(), a.clone(), b.clone(), c.clone()];
        let reversed = vec![me, c, b, a];

        let f1 = engine.contributions(0, &forward, &bounds, &mut Lcg::new(1)).total();
        let f2 = engine.contributions(0, &reversed, &bounds, &mut Lcg::new(1)).total();
        for axis in 0..3 {
            assert_relative_eq!(f1[axis], f2[axis], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_compute_reuses_buffer() {
        let mut engine = quiet_engine();
        let fishes: Vec<Fish> = (0..5)
            .map(|i| fish_at(i, Vector3::new(i as f64, 0.0, 0.0), Vector3::zeros()))
            .collect();
        let mut rng = Lcg::new(1);

        let first = engine.compute(&fishes, &Bounds::default(), &mut rng);
        assert_eq!(first.len(), 5);
        let ptr = first.as_ptr();
        assert_eq!(engine.compute(&fishes, &Bounds::default(), &mut rng).as_ptr(), ptr);
    }
}
