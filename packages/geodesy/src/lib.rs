#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geodesy primitives for radius queries over census blocks.
//!
//! Provides the two operations the query engine needs from an Earth
//! model: the forward transform from geographic to geocentric Cartesian
//! coordinates, and the exact ellipsoidal surface distance between two
//! geographic points. Both are fixed to WGS84 for the life of the process.
//!
//! Points use [`geo::Point`] with `x = longitude` and `y = latitude`, in
//! degrees.

use geo::Point;
use geographiclib_rs::{Geodesic, InverseGeodesic};

/// WGS84 equatorial radius in meters.
pub const WGS84_SEMI_MAJOR_AXIS: f64 = 6_378_137.0;

/// WGS84 inverse flattening.
pub const WGS84_INVERSE_FLATTENING: f64 = 298.257_223_563;

/// Operations consumed by the spatial filter.
///
/// Implementations must be pure: the same input always yields the same
/// output, so results are reproducible across queries.
pub trait GeodesyModel: Send + Sync {
    /// Forward transform of `point` (at ellipsoid height 0) to geocentric
    /// `(x, y, z)` in meters.
    fn to_geocentric(&self, point: Point<f64>) -> [f64; 3];

    /// Exact ellipsoidal surface distance between `a` and `b` in meters.
    fn ellipsoidal_distance(&self, a: Point<f64>, b: Point<f64>) -> f64;

    /// Geocentric coordinates rounded to the nearest whole meter, as
    /// persisted in the binary record layouts.
    fn to_geocentric_rounded(&self, point: Point<f64>) -> [i64; 3] {
        let [x, y, z] = self.to_geocentric(point);
        [round_meters(x), round_meters(y), round_meters(z)]
    }
}

/// The WGS84 ellipsoid.
///
/// Distances are solved with Karney's geodesic inverse, which is accurate
/// to a few nanometers anywhere on the ellipsoid, including nearly
/// antipodal points.
pub struct Wgs84 {
    geodesic: Geodesic,
    semi_major_axis: f64,
    eccentricity_sq: f64,
}

impl Wgs84 {
    #[must_use]
    pub fn new() -> Self {
        let flattening = 1.0 / WGS84_INVERSE_FLATTENING;
        Self {
            geodesic: Geodesic::wgs84(),
            semi_major_axis: WGS84_SEMI_MAJOR_AXIS,
            eccentricity_sq: flattening * (2.0 - flattening),
        }
    }

    /// Polar radius in meters.
    #[must_use]
    pub fn semi_minor_axis(&self) -> f64 {
        self.semi_major_axis * (1.0 - 1.0 / WGS84_INVERSE_FLATTENING)
    }
}

impl Default for Wgs84 {
    fn default() -> Self {
        Self::new()
    }
}

impl GeodesyModel for Wgs84 {
    fn to_geocentric(&self, point: Point<f64>) -> [f64; 3] {
        let lat = point.y().to_radians();
        let lon = point.x().to_radians();
        let (sin_lat, cos_lat) = lat.sin_cos();
        let (sin_lon, cos_lon) = lon.sin_cos();

        // Prime vertical radius of curvature.
        let n = self.semi_major_axis / self.eccentricity_sq.mul_add(-sin_lat * sin_lat, 1.0).sqrt();

        [
            n * cos_lat * cos_lon,
            n * cos_lat * sin_lon,
            n * (1.0 - self.eccentricity_sq) * sin_lat,
        ]
    }

    fn ellipsoidal_distance(&self, a: Point<f64>, b: Point<f64>) -> f64 {
        let s12: f64 = self.geodesic.inverse(a.y(), a.x(), b.y(), b.x());
        s12
    }
}

#[allow(clippy::cast_possible_truncation)]
fn round_meters(value: f64) -> i64 {
    value.round() as i64
}

/// Straight-line distance between two geocentric positions in meters.
#[must_use]
pub fn chord_length(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dz.mul_add(dz, dx.mul_add(dx, dy * dy)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn geocentric_on_equator_and_prime_meridian() {
        let model = Wgs84::new();
        let [x, y, z] = model.to_geocentric(Point::new(0.0, 0.0));
        assert!(close(x, WGS84_SEMI_MAJOR_AXIS, 1e-6));
        assert!(close(y, 0.0, 1e-6));
        assert!(close(z, 0.0, 1e-6));

        let [x, y, z] = model.to_geocentric(Point::new(90.0, 0.0));
        assert!(close(x, 0.0, 1e-6));
        assert!(close(y, WGS84_SEMI_MAJOR_AXIS, 1e-6));
        assert!(close(z, 0.0, 1e-6));
    }

    #[test]
    fn geocentric_at_poles_uses_polar_radius() {
        let model = Wgs84::new();
        let b = model.semi_minor_axis();
        assert!(close(b, 6_356_752.314_245, 1e-3));

        let north = model.to_geocentric(Point::new(0.0, 90.0));
        assert!(close(north[2], b, 1e-6));
        assert!(close(north[0].hypot(north[1]), 0.0, 1e-6));

        let south = model.to_geocentric(Point::new(-123.0, -90.0));
        assert!(close(south[2], -b, 1e-6));
    }

    #[test]
    fn rounded_geocentric_matches_unrounded_within_half_meter() {
        let model = Wgs84::new();
        let p = Point::new(-77.036_5, 38.897_7);
        let exact = model.to_geocentric(p);
        let rounded = model.to_geocentric_rounded(p);
        for axis in 0..3 {
            #[allow(clippy::cast_precision_loss)]
            let delta = (exact[axis] - rounded[axis] as f64).abs();
            assert!(delta <= 0.5, "axis {axis} off by {delta}");
        }
    }

    #[test]
    fn distance_of_one_degree_on_equator() {
        let model = Wgs84::new();
        let d = model.ellipsoidal_distance(Point::new(0.0, 0.0), Point::new(1.0, 0.0));
        assert!(close(d, 111_319.490_793, 1e-3), "got {d}");
    }

    #[test]
    fn distance_pole_to_pole() {
        let model = Wgs84::new();
        let d = model.ellipsoidal_distance(Point::new(0.0, 90.0), Point::new(0.0, -90.0));
        assert!(close(d, 20_003_931.458_6, 1e-2), "got {d}");
    }

    #[test]
    fn distance_is_symmetric_and_zero_at_same_point() {
        let model = Wgs84::new();
        let a = Point::new(-122.419_4, 37.774_9);
        let b = Point::new(-118.243_7, 34.052_2);
        assert!(model.ellipsoidal_distance(a, a).abs() < 1e-9);
        let ab = model.ellipsoidal_distance(a, b);
        let ba = model.ellipsoidal_distance(b, a);
        assert!(close(ab, ba, 1e-6));
        assert!(ab > 500_000.0 && ab < 600_000.0, "got {ab}");
    }

    #[test]
    fn chord_never_exceeds_surface_distance() {
        let model = Wgs84::new();
        let points = [
            Point::new(0.0, 0.0),
            Point::new(179.999, 0.5),
            Point::new(-179.999, -0.5),
            Point::new(45.0, 89.9),
            Point::new(-135.0, 89.95),
            Point::new(10.0, -60.0),
            Point::new(-73.985_7, 40.748_4),
        ];
        for a in points {
            for b in points {
                let chord = chord_length(model.to_geocentric(a), model.to_geocentric(b));
                let surface = model.ellipsoidal_distance(a, b);
                assert!(chord <= surface + 1e-6, "{a:?} {b:?}: {chord} > {surface}");
            }
        }
    }
}
