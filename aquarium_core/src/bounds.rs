//! Tank bounds: the axis-aligned box every fish must stay inside.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Axis-aligned containment box.
///
/// `x` and `z` are half extents around zero; the vertical axis is given
/// explicitly because the tank floor and water line are not symmetric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub x: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub z: f64,
}

impl Default for Bounds {
    /// The standard tank interior.
    fn default() -> Self {
        Self {
            x: 17.7,
            y_min: -11.4,
            y_max: 9.0,
            z: 7.7,
        }
    }
}

impl Bounds {
    /// Lowest corner.
    pub fn min(&self) -> Vector3<f64> {
        Vector3::new(-self.x, self.y_min, -self.z)
    }

    /// Highest corner.
    pub fn max(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y_max, self.z)
    }

    /// Centre of the box.
    pub fn center(&self) -> Vector3<f64> {
        (self.min() + self.max()) * 0.5
    }

    /// Returns true if `p` lies inside (inclusive).
    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        let (lo, hi) = (self.min(), self.max());
        (0..3).all(|i| p[i] >= lo[i] && p[i] <= hi[i])
    }

    /// Clamps `p` into the box shrunk by `margin` on every face.
    ///
    /// An axis narrower than twice the margin collapses to its midpoint.
    pub fn clamp(&self, p: &Vector3<f64>, margin: f64) -> Vector3<f64> {
        let (lo, hi) = (self.min(), self.max());
        let mut out = *p;
        for i in 0..3 {
            let (a, b) = (lo[i] + margin, hi[i] - margin);
            out[i] = if a <= b {
                p[i].clamp(a, b)
            } else {
                (lo[i] + hi[i]) * 0.5
            };
        }
        out
    }

    /// Rejects boxes that cannot contain anything.
    pub fn validate(&self) -> Result<(), String> {
        let finite = [self.x, self.y_min, self.y_max, self.z]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.x < 0.0 || self.z < 0.0 || self.y_min > self.y_max {
            return Err(format!("invalid bounds {:?}", self));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tank_corners() {
        let b = Bounds::default();
        assert_eq!(b.min(), Vector3::new(-17.7, -11.4, -7.7));
        assert_eq!(b.max(), Vector3::new(17.7, 9.0, 7.7));
    }

    #[test]
    fn test_clamp_pulls_outside_points_in_with_margin() {
        let b = Bounds::default();
        let p = b.clamp(&Vector3::new(100.0, -100.0, 0.0), 0.5);
        assert_eq!(p, Vector3::new(17.2, -10.9, 0.0));
        assert!(b.contains(&p));
    }

    #[test]
    fn test_clamp_collapses_narrow_axis() {
        let b = Bounds { x: 0.2, y_min: 0.0, y_max: 10.0, z: 5.0 };
        let p = b.clamp(&Vector3::new(0.19, 5.0, 0.0), 0.5);
        assert_eq!(p.x, 0.0);
        assert!(b.contains(&p));
    }

    #[test]
    fn test_validate() {
        assert!(Bounds::default().validate().is_ok());
        assert!(Bounds { y_min: 1.0, y_max: 0.0, ..Bounds::default() }.validate().is_err());
        assert!(Bounds { x: f64::NAN, ..Bounds::default() }.validate().is_err());
    }
}
