//! # Geohash Codec
//!
//! Converts coordinates into coarse base-32 location tokens and back.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         GEOHASH ENCODING                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  lon [-180, 180]   bit 1 if lon >= mid, keep upper half                 │
//! │  lat [ -90,  90]   bit 1 if lat >= mid, keep upper half                 │
//! │                                                                         │
//! │  Bits alternate lon, lat, lon, lat ... starting with longitude.        │
//! │  Every 5 bits become one character of                                   │
//! │                                                                         │
//! │      0123456789bcdefghjkmnpqrstuvwxyz                                   │
//! │                                                                         │
//! │  Decoding returns the CENTER of the final cell, never the original     │
//! │  point. That loss is the privacy mechanism.                             │
//! │                                                                         │
//! │  precision 4  ≈ 39 km × 20 km   "city"                                  │
//! │  precision 5  ≈ 4.9 km × 4.9 km "neighborhood" (±2.4 km)                │
//! │  precision 6  ≈ 1.2 km × 0.6 km "block"                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// The geohash base-32 alphabet (no `a`, `i`, `l`, `o`)
pub const BASE32_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Smallest supported precision
pub const MIN_PRECISION: usize = 1;

/// Largest supported precision (60 bits, sub-metre cells)
pub const MAX_PRECISION: usize = 12;

/// City-level precision (~20 km)
pub const PRECISION_CITY: usize = 4;

/// Neighborhood-level precision (~2.4 km)
pub const PRECISION_NEIGHBORHOOD: usize = 5;

/// Block-level precision (~600 m)
pub const PRECISION_BLOCK: usize = 6;

const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);
const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);

/// A raw coordinate pair.
///
/// Ephemeral: it is consumed once to produce a [`Geohash`] and never
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    /// Latitude in degrees, `[-90, 90]`
    pub latitude: f64,
    /// Longitude in degrees, `[-180, 180]`
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a validated point
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let point = Self {
            latitude,
            longitude,
        };
        point.validate()?;
        Ok(point)
    }

    /// Check that both coordinates are in range
    ///
    /// NaN is rejected as well since it is contained in no range.
    pub fn validate(&self) -> Result<()> {
        let lat_ok = (LATITUDE_RANGE.0..=LATITUDE_RANGE.1).contains(&self.latitude);
        let lon_ok = (LONGITUDE_RANGE.0..=LONGITUDE_RANGE.1).contains(&self.longitude);

        if lat_ok && lon_ok {
            Ok(())
        } else {
            Err(Error::InvalidCoordinate {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }
}

/// The rectangular cell a geohash denotes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Southern edge
    pub min_latitude: f64,
    /// Northern edge
    pub max_latitude: f64,
    /// Western edge
    pub min_longitude: f64,
    /// Eastern edge
    pub max_longitude: f64,
}

impl BoundingBox {
    fn world() -> Self {
        Self {
            min_latitude: LATITUDE_RANGE.0,
            max_latitude: LATITUDE_RANGE.1,
            min_longitude: LONGITUDE_RANGE.0,
            max_longitude: LONGITUDE_RANGE.1,
        }
    }

    /// Center of the cell
    pub fn center(&self) -> GeoPoint {
        GeoPoint {
            latitude: (self.min_latitude + self.max_latitude) / 2.0,
            longitude: (self.min_longitude + self.max_longitude) / 2.0,
        }
    }

    /// Whether a point falls inside (edges inclusive)
    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.latitude >= self.min_latitude
            && point.latitude <= self.max_latitude
            && point.longitude >= self.min_longitude
            && point.longitude <= self.max_longitude
    }
}

/// Cell height and width in degrees for a precision: `(lat_deg, lon_deg)`
///
/// Longitude receives the extra bit when the bit count is odd.
pub fn cell_size_degrees(precision: usize) -> (f64, f64) {
    let bits = 5 * precision as i32;
    let lon_bits = (bits + 1) / 2;
    let lat_bits = bits / 2;

    (
        180.0 / 2f64.powi(lat_bits),
        360.0 / 2f64.powi(lon_bits),
    )
}

fn check_precision(precision: usize) -> Result<()> {
    if (MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
        Ok(())
    } else {
        Err(Error::InvalidPrecision(precision))
    }
}

fn alphabet_index(c: char) -> Result<u8> {
    BASE32_ALPHABET
        .iter()
        .position(|&b| b as char == c)
        .map(|i| i as u8)
        .ok_or(Error::UnknownAlphabetChar(c))
}

/// Encode a coordinate at the given precision
///
/// Fails with [`Error::InvalidCoordinate`] when the point is out of range;
/// coordinates are never clamped.
pub fn encode(latitude: f64, longitude: f64, precision: usize) -> Result<String> {
    GeoPoint::new(latitude, longitude)?;
    check_precision(precision)?;

    let (mut lat_min, mut lat_max) = LATITUDE_RANGE;
    let (mut lon_min, mut lon_max) = LONGITUDE_RANGE;

    let mut hash = String::with_capacity(precision);
    let mut even_bit = true;
    let mut bit = 0;
    let mut index = 0usize;

    while hash.len() < precision {
        if even_bit {
            let mid = (lon_min + lon_max) / 2.0;
            if longitude >= mid {
                index = index * 2 + 1;
                lon_min = mid;
            } else {
                index *= 2;
                lon_max = mid;
            }
        } else {
            let mid = (lat_min + lat_max) / 2.0;
            if latitude >= mid {
                index = index * 2 + 1;
                lat_min = mid;
            } else {
                index *= 2;
                lat_max = mid;
            }
        }
        even_bit = !even_bit;

        bit += 1;
        if bit == 5 {
            hash.push(BASE32_ALPHABET[index] as char);
            bit = 0;
            index = 0;
        }
    }

    Ok(hash)
}

/// Decode a geohash string into its cell
///
/// Any non-empty length decodes; only [`encode`] and [`Geohash`] are limited
/// to [`MAX_PRECISION`]. Past about 20 characters the extra bits fall below
/// `f64` resolution and no longer shrink the cell.
pub fn decode_bounds(hash: &str) -> Result<BoundingBox> {
    if hash.is_empty() {
        return Err(Error::InvalidPrecision(0));
    }

    let mut cell = BoundingBox::world();
    let mut even_bit = true;

    for c in hash.chars() {
        let index = alphabet_index(c)?;
        for shift in (0..5).rev() {
            let bit_set = (index >> shift) & 1 == 1;
            if even_bit {
                let mid = (cell.min_longitude + cell.max_longitude) / 2.0;
                if bit_set {
                    cell.min_longitude = mid;
                } else {
                    cell.max_longitude = mid;
                }
            } else {
                let mid = (cell.min_latitude + cell.max_latitude) / 2.0;
                if bit_set {
                    cell.min_latitude = mid;
                } else {
                    cell.max_latitude = mid;
                }
            }
            even_bit = !even_bit;
        }
    }

    Ok(cell)
}

/// Decode a geohash string to the center of its cell
pub fn decode(hash: &str) -> Result<GeoPoint> {
    Ok(decode_bounds(hash)?.center())
}

/// An immutable, validated geohash token
///
/// Invariant: `value.len() == precision` and every character is drawn from
/// [`BASE32_ALPHABET`]. Deserialisation goes through the same validation, so
/// a corrupt token in a stored profile surfaces as a decode error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Geohash {
    value: String,
}

impl Geohash {
    /// Encode a point
    pub fn encode(point: GeoPoint, precision: usize) -> Result<Self> {
        Ok(Self {
            value: encode(point.latitude, point.longitude, precision)?,
        })
    }

    /// Parse and validate an existing token
    pub fn parse(value: &str) -> Result<Self> {
        check_precision(value.chars().count())?;
        for c in value.chars() {
            alphabet_index(c)?;
        }
        Ok(Self {
            value: value.to_string(),
        })
    }

    /// The token text
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Number of characters
    pub fn precision(&self) -> usize {
        self.value.len()
    }

    /// The cell this token denotes
    pub fn bounds(&self) -> BoundingBox {
        // Validated at construction; the fallback is unreachable.
        decode_bounds(&self.value).unwrap_or_else(|_| BoundingBox::world())
    }

    /// Center of the cell
    pub fn center(&self) -> GeoPoint {
        self.bounds().center()
    }

    /// A coarser token for the same area
    ///
    /// Returns `self` unchanged when `precision` is not smaller.
    pub fn truncate(&self, precision: usize) -> Result<Self> {
        check_precision(precision)?;
        if precision >= self.precision() {
            return Ok(self.clone());
        }
        Ok(Self {
            value: self.value[..precision].to_string(),
        })
    }
}

impl fmt::Display for Geohash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl FromStr for Geohash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Geohash {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Geohash> for String {
    fn from(hash: Geohash) -> Self {
        hash.value
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::distance::{box_diagonal_m, haversine_m};

    #[test]
    fn test_encode_known_values() {
        assert_eq!(encode(0.0, 0.0, 4).unwrap(), "s000");
        assert_eq!(encode(57.64911, 10.40744, 11).unwrap(), "u4pruydqqvj");
        assert_eq!(encode(57.64911, 10.40744, 5).unwrap(), "u4pru");
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        assert!(matches!(
            encode(90.5, 0.0, 5),
            Err(Error::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            encode(0.0, -180.01, 5),
            Err(Error::InvalidCoordinate { .. })
        ));
        assert!(matches!(
            encode(f64::NAN, 0.0, 5),
            Err(Error::InvalidCoordinate { .. })
        ));
    }

    #[test]
    fn test_encode_accepts_range_edges() {
        for (lat, lon) in [(90.0, 180.0), (-90.0, -180.0), (90.0, -180.0), (-90.0, 180.0)] {
            let hash = encode(lat, lon, 6).unwrap();
            let cell = decode_bounds(&hash).unwrap();
            assert!(cell.contains(&GeoPoint {
                latitude: lat,
                longitude: lon
            }));
        }
    }

    #[test]
    fn test_invalid_precision() {
        assert!(matches!(encode(0.0, 0.0, 0), Err(Error::InvalidPrecision(0))));
        assert!(matches!(encode(0.0, 0.0, 13), Err(Error::InvalidPrecision(13))));
        assert!(matches!(decode(""), Err(Error::InvalidPrecision(0))));
        assert!(matches!(
            Geohash::parse("u33dc0u33dc0u"),
            Err(Error::InvalidPrecision(13))
        ));
    }

    #[test]
    fn test_decode_accepts_long_hashes() {
        let long = "u33dc0cpke7vz";
        let cell = decode_bounds(long).unwrap();
        let parent = decode_bounds(&long[..12]).unwrap();
        assert!(parent.contains(&cell.center()));
        assert!(cell.max_latitude - cell.min_latitude < parent.max_latitude - parent.min_latitude);
    }

    #[test]
    fn test_decode_rejects_unknown_characters() {
        assert!(matches!(decode("u4pra"), Err(Error::UnknownAlphabetChar('a'))));
        assert!(matches!(decode("U4PRU"), Err(Error::UnknownAlphabetChar('U'))));
        assert!(matches!(
            Geohash::parse("u4pio"),
            Err(Error::UnknownAlphabetChar('i'))
        ));
    }

    #[test]
    fn test_decode_returns_cell_center() {
        let cell = decode_bounds("s000").unwrap();
        let center = decode("s000").unwrap();
        assert_eq!(center, cell.center());
        // Not the original (0, 0): the cell lies north-east of it
        assert!(center.latitude > 0.0 && center.longitude > 0.0);
    }

    #[test]
    fn test_cell_sizes_per_precision() {
        let (lat5, lon5) = cell_size_degrees(PRECISION_NEIGHBORHOOD);
        assert!((lat5 - 180.0 / 4096.0).abs() < 1e-12);
        assert!((lon5 - 360.0 / 8192.0).abs() < 1e-12);

        let cell = decode_bounds("u4pru").unwrap();
        assert!(((cell.max_latitude - cell.min_latitude) - lat5).abs() < 1e-9);
        assert!(((cell.max_longitude - cell.min_longitude) - lon5).abs() < 1e-9);
    }

    #[test]
    fn test_round_trip_within_box_diagonal() {
        let points = [
            (0.0, 0.0),
            (51.5007, -0.1246),
            (-33.8568, 151.2153),
            (40.6892, -74.0445),
            (89.9, 179.9),
            (-89.9, -179.9),
            (35.6586, 139.7454),
        ];

        for precision in [PRECISION_CITY, PRECISION_NEIGHBORHOOD, PRECISION_BLOCK, 8] {
            let limit = box_diagonal_m(precision);
            for (lat, lon) in points {
                let original = GeoPoint::new(lat, lon).unwrap();
                let hash = Geohash::encode(original, precision).unwrap();
                assert_eq!(hash.precision(), precision);

                let center = hash.center();
                assert!(hash.bounds().contains(&original));
                let error = haversine_m(original, center);
                assert!(
                    error <= limit,
                    "{:?} at precision {} drifted {} m (limit {} m)",
                    original,
                    precision,
                    error,
                    limit
                );
            }
        }
    }

    #[test]
    fn test_truncate_is_prefix() {
        let block = Geohash::encode(GeoPoint::new(48.8584, 2.2945).unwrap(), PRECISION_BLOCK).unwrap();
        let city = block.truncate(PRECISION_CITY).unwrap();
        assert_eq!(city.precision(), PRECISION_CITY);
        assert!(block.as_str().starts_with(city.as_str()));
        assert_eq!(block.truncate(9).unwrap(), block);
    }

    #[test]
    fn test_geohash_serde_validates() {
        let hash = Geohash::parse("gcpvj").unwrap();
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, "\"gcpvj\"");

        let restored: Geohash = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, hash);

        let corrupt: std::result::Result<Geohash, _> = serde_json::from_str("\"gcpva\"");
        assert!(corrupt.is_err());
    }
}
