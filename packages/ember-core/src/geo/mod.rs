//! # Geo Module
//!
//! Coarse, non-reversible location tokens and approximate distances.
//!
//! Raw coordinates enter the engine exactly once, through
//! [`Geohash::encode`]. Everything downstream (profiles, ranking, sync)
//! only ever sees the token.

pub mod distance;
pub mod geohash;

pub use distance::{box_diagonal_m, distance_m, haversine_m, DistanceBand, EARTH_RADIUS_M};
pub use geohash::{
    decode, decode_bounds, encode, BoundingBox, GeoPoint, Geohash, PRECISION_BLOCK,
    PRECISION_CITY, PRECISION_NEIGHBORHOOD,
};
