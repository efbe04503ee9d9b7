//! # Distance Estimator
//!
//! Great-circle distance between decoded geohash centers.
//!
//! Inputs are already lossy cell centers, so every result carries an error
//! of up to one cell diagonal. Callers present [`DistanceBand`]s, never the
//! raw figure.

use serde::{Deserialize, Serialize};

use super::geohash::{cell_size_degrees, GeoPoint, Geohash};

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two points in meters
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Approximate distance between two geohashes in meters
///
/// Symmetric and exactly zero for identical hashes. The pair is put in a
/// fixed order before computing so `distance_m(a, b)` and `distance_m(b, a)`
/// evaluate the same float expression.
pub fn distance_m(h1: &Geohash, h2: &Geohash) -> f64 {
    if h1 == h2 {
        return 0.0;
    }
    let (first, second) = if h1 < h2 { (h1, h2) } else { (h2, h1) };
    haversine_m(first.center(), second.center())
}

/// Diagonal of a cell at the equator, the widest a cell of this precision gets
///
/// Upper bound on how far a decoded center can sit from the encoded point.
pub fn box_diagonal_m(precision: usize) -> f64 {
    let (lat_deg, lon_deg) = cell_size_degrees(precision);
    haversine_m(
        GeoPoint {
            latitude: -lat_deg / 2.0,
            longitude: -lon_deg / 2.0,
        },
        GeoPoint {
            latitude: lat_deg / 2.0,
            longitude: lon_deg / 2.0,
        },
    )
}

/// Coarse display bucket for an approximate distance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DistanceBand {
    /// Under 1 km
    UnderOneKm,
    /// Under 5 km
    UnderFiveKm,
    /// Under 10 km
    UnderTenKm,
    /// Under 25 km
    UnderTwentyFiveKm,
    /// Under 50 km
    UnderFiftyKm,
    /// Under 100 km
    UnderHundredKm,
    /// 100 km or more
    Far,
}

impl DistanceBand {
    /// Bucket a distance in meters
    pub fn from_meters(meters: f64) -> Self {
        match meters {
            m if m < 1_000.0 => DistanceBand::UnderOneKm,
            m if m < 5_000.0 => DistanceBand::UnderFiveKm,
            m if m < 10_000.0 => DistanceBand::UnderTenKm,
            m if m < 25_000.0 => DistanceBand::UnderTwentyFiveKm,
            m if m < 50_000.0 => DistanceBand::UnderFiftyKm,
            m if m < 100_000.0 => DistanceBand::UnderHundredKm,
            _ => DistanceBand::Far,
        }
    }

    /// Label shown in discovery cards
    pub fn label(&self) -> &'static str {
        match self {
            DistanceBand::UnderOneKm => "<1 km",
            DistanceBand::UnderFiveKm => "<5 km",
            DistanceBand::UnderTenKm => "<10 km",
            DistanceBand::UnderTwentyFiveKm => "<25 km",
            DistanceBand::UnderFiftyKm => "<50 km",
            DistanceBand::UnderHundredKm => "<100 km",
            DistanceBand::Far => "100+ km",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::geohash::PRECISION_NEIGHBORHOOD;

    fn hash(lat: f64, lon: f64) -> Geohash {
        Geohash::encode(GeoPoint::new(lat, lon).unwrap(), PRECISION_NEIGHBORHOOD).unwrap()
    }

    #[test]
    fn test_distance_identical_is_zero() {
        let h = hash(52.52, 13.405);
        assert_eq!(distance_m(&h, &h), 0.0);
        assert_eq!(distance_m(&h, &h.clone()), 0.0);
    }

    #[test]
    fn test_distance_symmetry() {
        let places = [
            hash(52.52, 13.405),
            hash(48.8566, 2.3522),
            hash(-33.8688, 151.2093),
            hash(40.7128, -74.006),
            hash(0.0, 179.99),
            hash(0.0, -179.99),
        ];
        for a in &places {
            for b in &places {
                assert_eq!(distance_m(a, b), distance_m(b, a));
            }
        }
    }

    #[test]
    fn test_distance_berlin_paris() {
        let berlin = hash(52.52, 13.405);
        let paris = hash(48.8566, 2.3522);
        let d = distance_m(&berlin, &paris);
        // ~878 km, give or take two cells
        assert!((d - 878_000.0).abs() < 10_000.0, "got {}", d);
        assert_eq!(DistanceBand::from_meters(d), DistanceBand::Far);
    }

    #[test]
    fn test_haversine_quarter_meridian() {
        let d = haversine_m(
            GeoPoint::new(0.0, 0.0).unwrap(),
            GeoPoint::new(90.0, 0.0).unwrap(),
        );
        let expected = std::f64::consts::PI / 2.0 * EARTH_RADIUS_M;
        assert!((d - expected).abs() < 1.0);
    }

    #[test]
    fn test_box_diagonal_shrinks_with_precision() {
        let city = box_diagonal_m(4);
        let hood = box_diagonal_m(5);
        let block = box_diagonal_m(6);
        assert!(city > hood && hood > block);
        // precision 5 cells are ~4.9 km square at the equator
        assert!(hood > 6_000.0 && hood < 7_500.0, "got {}", hood);
    }

    #[test]
    fn test_distance_bands() {
        assert_eq!(DistanceBand::from_meters(0.0), DistanceBand::UnderOneKm);
        assert_eq!(DistanceBand::from_meters(999.9), DistanceBand::UnderOneKm);
        assert_eq!(DistanceBand::from_meters(1_000.0), DistanceBand::UnderFiveKm);
        assert_eq!(DistanceBand::from_meters(24_000.0), DistanceBand::UnderTwentyFiveKm);
        assert_eq!(DistanceBand::from_meters(250_000.0), DistanceBand::Far);
        assert_eq!(DistanceBand::UnderFiveKm.label(), "<5 km");
    }
}
