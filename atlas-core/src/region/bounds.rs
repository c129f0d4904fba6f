//! Latitude/longitude bounding rectangles that may wrap the antimeridian.

use geo::Rect;

/// Axis-aligned bounds in degrees.
///
/// Longitudes describe an arc running east from `lon_lo` to `lon_hi`; when
/// `lon_lo > lon_hi` the arc crosses the antimeridian.
///
/// # Examples
///
/// ```
/// use atlas_core::Bounds;
///
/// let west = Bounds::new(-1.0, 1.0, 170.0, 179.0);
/// let east = Bounds::new(-1.0, 1.0, -179.0, -170.0);
/// let union = west.union(&east);
/// assert!(union.crosses_antimeridian());
/// assert_eq!((union.lon_lo, union.lon_hi), (170.0, -170.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Southern edge.
    pub lat_lo: f64,
    /// Northern edge.
    pub lat_hi: f64,
    /// Western edge of the longitude arc.
    pub lon_lo: f64,
    /// Eastern edge of the longitude arc.
    pub lon_hi: f64,
}

impl Bounds {
    /// Construct bounds from edges in degrees.
    #[must_use]
    pub const fn new(lat_lo: f64, lat_hi: f64, lon_lo: f64, lon_hi: f64) -> Self {
        Self {
            lat_lo,
            lat_hi,
            lon_lo,
            lon_hi,
        }
    }

    /// Bounds spanning every longitude between two latitudes.
    #[must_use]
    pub const fn full_longitude(lat_lo: f64, lat_hi: f64) -> Self {
        Self::new(lat_lo, lat_hi, -180.0, 180.0)
    }

    /// Build bounds from a western edge and an eastward arc length.
    ///
    /// Arcs of 360 degrees or more collapse to the full longitude range.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "arc ends are computed on the longitude circle"
    )]
    pub fn from_arc(lat_lo: f64, lat_hi: f64, lon_lo: f64, span: f64) -> Self {
        if span >= 360.0 {
            return Self::full_longitude(lat_lo, lat_hi);
        }
        Self::new(lat_lo, lat_hi, wrap_low(lon_lo), wrap_high(lon_lo + span))
    }

    /// Whether the longitude arc crosses the antimeridian.
    #[must_use]
    pub fn crosses_antimeridian(&self) -> bool {
        self.lon_lo > self.lon_hi
    }

    /// Eastward length of the longitude arc in degrees.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "arc length is measured on the longitude circle"
    )]
    pub fn lon_span(&self) -> f64 {
        if self.crosses_antimeridian() {
            self.lon_hi - self.lon_lo + 360.0
        } else {
            self.lon_hi - self.lon_lo
        }
    }

    /// Whether the arc contains `lon`.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "offsets are measured on the longitude circle"
    )]
    pub fn contains_lon(&self, lon: f64) -> bool {
        (lon - self.lon_lo).rem_euclid(360.0) <= self.lon_span()
    }

    /// Whether the bounds contain the point `(lon, lat)`, edges inclusive.
    #[must_use]
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.lat_lo..=self.lat_hi).contains(&lat) && self.contains_lon(lon)
    }

    /// Whether the bounds overlap `rect`, whose longitudes lie in
    /// `[-180, 180]`.
    #[must_use]
    pub fn intersects_rect(&self, rect: &Rect<f64>) -> bool {
        let (min, max) = (rect.min(), rect.max());
        if self.lat_hi < min.y || self.lat_lo > max.y {
            return false;
        }
        self.contains_lon(min.x) || (min.x..=max.x).contains(&self.lon_lo)
    }

    /// Smallest single arc starting at either input's western edge that
    /// covers both inputs.
    ///
    /// The result always contains both inputs but is not guaranteed to be
    /// the minimal enclosing bound.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "arc offsets are measured on the longitude circle"
    )]
    pub fn union(&self, other: &Self) -> Self {
        let lat_lo = self.lat_lo.min(other.lat_lo);
        let lat_hi = self.lat_hi.max(other.lat_hi);
        let (span_a, span_b) = (self.lon_span(), other.lon_span());
        let from_a = span_a.max((other.lon_lo - self.lon_lo).rem_euclid(360.0) + span_b);
        let from_b = span_b.max((self.lon_lo - other.lon_lo).rem_euclid(360.0) + span_a);
        if from_a <= from_b {
            Self::from_arc(lat_lo, lat_hi, self.lon_lo, from_a)
        } else {
            Self::from_arc(lat_lo, lat_hi, other.lon_lo, from_b)
        }
    }
}

/// Wrap a western edge into `[-180, 180)`.
#[expect(
    clippy::float_arithmetic,
    reason = "longitudes wrap on a 360 degree circle"
)]
pub(crate) fn wrap_low(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Wrap an eastern edge into `(-180, 180]`.
#[expect(
    clippy::float_arithmetic,
    reason = "longitudes wrap on a 360 degree circle"
)]
pub(crate) fn wrap_high(lon: f64) -> f64 {
    180.0 - (180.0 - lon).rem_euclid(360.0)
}
