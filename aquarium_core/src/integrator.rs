//! Integrator: damping, speed cap, position update, containment, facing.
//!
//! Forces are already folded into velocity by the time this runs. Motion is
//! first order: velocity is damped and capped, then position moves by
//! `velocity · dt` and is clipped into the tank. Walls clip, they do not
//! bounce; a pinned fish stays put until its forces turn it around.

use crate::bounds::Bounds;
use crate::fish::Fish;
use crate::flocking::limit;
use crate::rng::Lcg;
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IntegratorConfig {
    /// Water resistance applied to every fish, compounded with the fish's own
    pub global_damping: f64,

    /// Per-tick speed cap multiplier range `[min, max)` over the base speed
    pub speed_variation: (f64, f64),

    /// Distance kept from every face when clipping
    pub containment_margin: f64,

    /// Below this speed the previous facing is kept
    pub orientation_epsilon: f64,
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            global_damping: 0.98,
            speed_variation: (0.7, 1.3),
            containment_margin: 0.5,
            orientation_epsilon: 1e-4,
        }
    }
}

/// Advances one fish by `dt` seconds.
pub fn integrate(fish: &mut Fish, dt: f64, bounds: &Bounds, rng: &mut Lcg, config: &IntegratorConfig) {
    if !fish.velocity.iter().all(|v| v.is_finite()) {
        fish.velocity = Vector3::zeros();
    }

    fish.velocity *= config.global_damping * fish.damping;

    let (lo, hi) = config.speed_variation;
    fish.max_speed = (fish.base_speed * rng.range(lo, hi)).max(0.0);
    fish.velocity = limit(fish.velocity, fish.max_speed);

    let moved = fish.position + fish.velocity * dt;
    let moved = if moved.iter().all(|v| v.is_finite()) {
        moved
    } else {
        bounds.center()
    };
    fish.position = bounds.clamp(&moved, config.containment_margin);

    fish.orientation = face_along(&fish.orientation, &fish.velocity, config.orientation_epsilon);
}

/// Facing that looks along `velocity`, or `previous` when nearly stationary.
pub fn face_along(
    previous: &UnitQuaternion<f64>,
    velocity: &Vector3<f64>,
    epsilon: f64,
) -> UnitQuaternion<f64> {
    if velocity.norm() <= epsilon {
        return *previous;
    }
    UnitQuaternion::rotation_between(&Vector3::z(), velocity)
        .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&Vector3::y_axis(), PI))
}
