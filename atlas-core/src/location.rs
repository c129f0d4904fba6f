//! Fixed-point geographic coordinates.
//!
//! Coordinates are stored as signed integers in units of 1e-7 degree, the
//! same precision used by common map interchange formats. A [`Location`]
//! packs into a single `u64` so the coordinate table can store it as one
//! integer column.

use geo::Coord;
use thiserror::Error;

/// Number of fixed-point units per degree.
pub const COORDINATE_PRECISION: i32 = 10_000_000;

/// Longitude/latitude pair in fixed-point units of 1e-7 degree.
///
/// # Examples
///
/// ```
/// use atlas_core::Location;
///
/// let location = Location::new(-739_937_000, 407_411_000);
/// assert_eq!(Location::from_packed(location.to_packed()), location);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Location {
    /// Longitude in 1e-7 degree units.
    pub lon: i32,
    /// Latitude in 1e-7 degree units.
    pub lat: i32,
}

/// Errors returned by [`Location::from_degrees`].
#[derive(Debug, Error, PartialEq)]
pub enum LocationError {
    /// A coordinate was NaN or infinite.
    #[error("coordinate ({lon}, {lat}) is not finite")]
    NotFinite {
        /// Longitude supplied by the caller.
        lon: f64,
        /// Latitude supplied by the caller.
        lat: f64,
    },
    /// The coordinate lies outside the valid longitude/latitude ranges.
    #[error("coordinate ({lon}, {lat}) is outside [-180, 180] x [-90, 90]")]
    OutOfRange {
        /// Longitude supplied by the caller.
        lon: f64,
        /// Latitude supplied by the caller.
        lat: f64,
    },
}

impl Location {
    /// Construct a location from raw fixed-point values.
    #[must_use]
    pub const fn new(lon: i32, lat: i32) -> Self {
        Self { lon, lat }
    }

    /// Convert decimal degrees into a fixed-point location.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError`] when either value is not finite or lies
    /// outside the valid coordinate ranges.
    #[expect(
        clippy::float_arithmetic,
        reason = "degrees are scaled into fixed-point units"
    )]
    pub fn from_degrees(lon: f64, lat: f64) -> Result<Self, LocationError> {
        if !lon.is_finite() || !lat.is_finite() {
            return Err(LocationError::NotFinite { lon, lat });
        }
        if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
            return Err(LocationError::OutOfRange { lon, lat });
        }
        let scale = f64::from(COORDINATE_PRECISION);
        Ok(Self {
            lon: to_fixed(lon * scale),
            lat: to_fixed(lat * scale),
        })
    }

    /// Longitude in decimal degrees.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "fixed-point units are scaled back into degrees"
    )]
    pub fn lon_degrees(self) -> f64 {
        f64::from(self.lon) / f64::from(COORDINATE_PRECISION)
    }

    /// Latitude in decimal degrees.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "fixed-point units are scaled back into degrees"
    )]
    pub fn lat_degrees(self) -> f64 {
        f64::from(self.lat) / f64::from(COORDINATE_PRECISION)
    }

    /// Geometry coordinate with `x = longitude` and `y = latitude`.
    #[must_use]
    pub fn to_coord(self) -> Coord<f64> {
        Coord {
            x: self.lon_degrees(),
            y: self.lat_degrees(),
        }
    }

    /// Pack into a single integer: longitude bits high, latitude bits low.
    #[must_use]
    pub const fn to_packed(self) -> u64 {
        ((self.lon.cast_unsigned() as u64) << 32) | self.lat.cast_unsigned() as u64
    }

    /// Inverse of [`Location::to_packed`].
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "each half of the packed value is exactly 32 bits"
    )]
    pub const fn from_packed(packed: u64) -> Self {
        Self {
            lon: ((packed >> 32) as u32).cast_signed(),
            lat: (packed as u32).cast_signed(),
        }
    }
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "callers range-check degrees before scaling"
)]
fn to_fixed(scaled: f64) -> i32 {
    scaled.round() as i32
}
