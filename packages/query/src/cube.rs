//! Conservative geocentric bounding cube around a query point.
//!
//! The straight-line (chord) distance between two points on the ellipsoid
//! never exceeds the geodesic distance between them, so every block within
//! `r` meters of the query point has each geocentric axis within `r` of the
//! query's. Stored positions are rounded to whole meters and may differ
//! from the exact transform by up to [`GEOCENTRIC_TOLERANCE_METERS`], so the
//! cube is widened by that tolerance plus one meter for float error, and
//! its bounds are always rounded away from the query point.

use census_radius_dataset::GEOCENTRIC_TOLERANCE_METERS;

/// Extra meters added to each side of the cube beyond the radius.
pub const CUBE_MARGIN_METERS: i64 = GEOCENTRIC_TOLERANCE_METERS + 1;

/// Inclusive axis-aligned box in whole geocentric meters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingCube {
    pub min: [i64; 3],
    pub max: [i64; 3],
}

impl BoundingCube {
    /// Smallest whole-meter cube guaranteed to contain every stored
    /// position within `radius_meters` of `center`.
    #[must_use]
    pub fn around(center: [f64; 3], radius_meters: f64) -> Self {
        let mut min = [0; 3];
        let mut max = [0; 3];
        for axis in 0..3 {
            min[axis] = floor_meters(center[axis] - radius_meters) - CUBE_MARGIN_METERS;
            max[axis] = ceil_meters(center[axis] + radius_meters) + CUBE_MARGIN_METERS;
        }
        Self { min, max }
    }

    /// Whether `position` lies inside or on the cube.
    #[must_use]
    pub fn contains(&self, position: &[i64; 3]) -> bool {
        (0..3).all(|axis| self.min[axis] <= position[axis] && position[axis] <= self.max[axis])
    }
}

#[allow(clippy::cast_possible_truncation)]
fn floor_meters(value: f64) -> i64 {
    value.floor() as i64
}

#[allow(clippy::cast_possible_truncation)]
fn ceil_meters(value: f64) -> i64 {
    value.ceil() as i64
}
