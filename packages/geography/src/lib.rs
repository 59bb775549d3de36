#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Coordinate type and great-circle distance math.
//!
//! Everything here is pure: no I/O, no allocation, no failure modes. Invalid
//! input (NaN or infinite degrees) is not rejected; it simply propagates
//! through the arithmetic and callers are expected to validate first (see
//! [`Coordinate::is_finite`]).

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometers used by [`distance_km`].
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Coordinate {
    /// Creates a new coordinate from latitude and longitude degrees.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns `true` if both components are finite numbers.
    #[must_use]
    pub const fn is_finite(self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    /// Great-circle distance to `other` in kilometers.
    #[must_use]
    pub fn distance_km(self, other: Self) -> f64 {
        distance_km(self, other)
    }
}

/// Haversine distance between two coordinates in kilometers.
///
/// Uses a spherical Earth of radius [`EARTH_RADIUS_KM`]. Any finite input
/// yields a finite, non-negative result.
#[must_use]
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos()
            * b.latitude.to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);

    // Rounding can push `h` a hair above 1.0 for antipodal points.
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_point_is_zero() {
        let p = Coordinate::new(38.8951, -77.0364);
        assert!(distance_km(p, p).abs() < f64::EPSILON);
    }

    #[test]
    fn one_degree_of_latitude() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(1.0, 0.0);
        // 6371 * pi / 180
        assert!((distance_km(a, b) - 111.194_926_6).abs() < 1e-6);
    }

    #[test]
    fn known_city_pair() {
        // Washington, DC to Baltimore, MD is roughly 56 km as the crow flies.
        let dc = Coordinate::new(38.9072, -77.0369);
        let baltimore = Coordinate::new(39.2904, -76.6122);
        let d = distance_km(dc, baltimore);
        assert!((d - 56.0).abs() < 1.5, "unexpected distance {d}");
    }

    #[test]
    fn symmetric() {
        let a = Coordinate::new(41.8781, -87.6298);
        let b = Coordinate::new(40.7128, -74.0060);
        assert!((distance_km(a, b) - distance_km(b, a)).abs() < 1e-9);
    }

    #[test]
    fn antipodal_points_stay_finite() {
        let a = Coordinate::new(0.0, 0.0);
        let b = Coordinate::new(0.0, 180.0);
        let d = distance_km(a, b);
        assert!(d.is_finite());
        assert!((d - EARTH_RADIUS_KM * std::f64::consts::PI).abs() < 1e-6);
    }

    #[test]
    fn nan_propagates() {
        let a = Coordinate::new(f64::NAN, 0.0);
        let b = Coordinate::new(1.0, 1.0);
        assert!(distance_km(a, b).is_nan());
        assert!(!a.is_finite());
        assert!(b.is_finite());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(Coordinate::new(1.5, -2.5)).unwrap();
        assert_eq!(json, serde_json::json!({"latitude": 1.5, "longitude": -2.5}));
    }
}
