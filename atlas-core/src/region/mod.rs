//! Query regions and their text formats.
//!
//! A [`Region`] is the union of one or more shapes. Regions answer two
//! questions for the rest of the engine: does a coordinate fall inside, and
//! might a cell rectangle overlap it. The second test is allowed to be
//! conservative because coverings only need to be supersets.

mod bounds;
mod parse;

use geo::{BoundingRect, Coord, Intersects, Polygon, Rect};
use thiserror::Error;

pub use bounds::Bounds;
use bounds::{wrap_high, wrap_low};
pub use parse::RegionFormat;

/// Longitude offsets tried when testing polygons whose vertices run past
/// the antimeridian.
const WRAP_OFFSETS: [f64; 3] = [0.0, 360.0, -360.0];

/// Circular region on the sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Disc {
    /// Centre with `x = longitude` and `y = latitude`.
    pub center: Coord<f64>,
    /// Angular radius in degrees.
    pub radius_deg: f64,
}

/// One component of a [`Region`].
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Latitude/longitude rectangle, possibly wrapping the antimeridian.
    Rect(Bounds),
    /// Spherical cap.
    Disc(Disc),
    /// Planar polygon in lon/lat degrees, holes included.
    Polygon(Polygon<f64>),
}

/// A union of shapes used to select entities.
///
/// # Examples
///
/// ```
/// use atlas_core::{Region, RegionFormat};
/// use geo::Coord;
///
/// let region = Region::parse(RegionFormat::Bbox, "-1.0,-1.0,1.0,1.0").expect("valid bbox");
/// assert!(region.contains(Coord { x: 0.5, y: 0.5 }));
/// assert!(!region.contains(Coord { x: 2.0, y: 0.0 }));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    shapes: Vec<Shape>,
}

/// Errors produced while parsing a region description.
#[derive(Debug, Error)]
pub enum RegionError {
    /// The text held the wrong number of comma-separated values.
    #[error("{format} region needs {expected} comma-separated numbers, found {found}")]
    FieldCount {
        /// Region format being parsed.
        format: &'static str,
        /// Number of values the format requires.
        expected: usize,
        /// Number of values present.
        found: usize,
    },
    /// A value could not be parsed as a number.
    #[error("invalid number `{value}` in {format} region")]
    Number {
        /// Region format being parsed.
        format: &'static str,
        /// Offending text.
        value: String,
        /// Parser failure.
        #[source]
        source: std::num::ParseFloatError,
    },
    /// A latitude fell outside `[-90, 90]`.
    #[error("latitude {value} is outside [-90, 90]")]
    Latitude {
        /// Offending latitude.
        value: f64,
    },
    /// A longitude fell outside `[-180, 180]`.
    #[error("longitude {value} is outside [-180, 180]")]
    Longitude {
        /// Offending longitude.
        value: f64,
    },
    /// The southern edge of a rectangle lies north of its northern edge.
    #[error("minimum latitude {min} exceeds maximum latitude {max}")]
    InvertedLatitude {
        /// Southern edge.
        min: f64,
        /// Northern edge.
        max: f64,
    },
    /// A disc radius was negative or not finite.
    #[error("disc radius {value} must be finite and non-negative")]
    Radius {
        /// Offending radius.
        value: f64,
    },
    /// A poly file line did not hold a coordinate pair.
    #[error("poly line {line} is not a coordinate pair: `{text}`")]
    PolyLine {
        /// One-based line number.
        line: usize,
        /// Offending text.
        text: String,
    },
    /// A ring had fewer than three distinct vertices.
    #[error("ring {ring} has fewer than three distinct points")]
    DegenerateRing {
        /// Zero-based ring index within the description.
        ring: usize,
    },
    /// The GeoJSON text was not valid JSON.
    #[error("invalid GeoJSON region: {source}")]
    Json {
        /// Decoder failure.
        #[source]
        source: serde_json::Error,
    },
    /// A required GeoJSON member was missing or had the wrong shape.
    #[error("GeoJSON member `{member}` is missing or malformed")]
    JsonMember {
        /// Name of the member.
        member: &'static str,
    },
    /// The GeoJSON geometry type cannot describe an area.
    #[error("unsupported GeoJSON geometry type `{kind}`")]
    UnsupportedGeometry {
        /// Geometry type found in the document.
        kind: String,
    },
    /// The description produced no shapes.
    #[error("region description contains no shapes")]
    Empty,
    /// A region file extension did not map to a known format.
    #[error("cannot infer region format from `{path}`")]
    UnknownExtension {
        /// File name supplied by the caller.
        path: String,
    },
}

impl Shape {
    fn contains(&self, coord: Coord<f64>) -> bool {
        match self {
            Self::Rect(bounds) => bounds.contains(coord.x, coord.y),
            Self::Disc(disc) => disc.contains(coord),
            Self::Polygon(polygon) => WRAP_OFFSETS.iter().any(|offset| {
                polygon.intersects(&Coord {
                    x: shifted(coord.x, *offset),
                    y: coord.y,
                })
            }),
        }
    }

    fn intersects_rect(&self, rect: &Rect<f64>) -> bool {
        match self {
            Self::Rect(bounds) => bounds.intersects_rect(rect),
            Self::Disc(disc) => disc.bounds().intersects_rect(rect),
            Self::Polygon(polygon) => WRAP_OFFSETS.iter().any(|offset| {
                let min = rect.min();
                let max = rect.max();
                let moved = Rect::new(
                    Coord {
                        x: shifted(min.x, *offset),
                        y: min.y,
                    },
                    Coord {
                        x: shifted(max.x, *offset),
                        y: max.y,
                    },
                );
                polygon.intersects(&moved)
            }),
        }
    }

    #[expect(
        clippy::float_arithmetic,
        reason = "polygon extents are measured in degrees"
    )]
    fn bounds(&self) -> Bounds {
        match self {
            Self::Rect(bounds) => *bounds,
            Self::Disc(disc) => disc.bounds(),
            Self::Polygon(polygon) => polygon.bounding_rect().map_or_else(
                || Bounds::full_longitude(-90.0, 90.0),
                |rect| {
                    let (min, max) = (rect.min(), rect.max());
                    Bounds::from_arc(min.y, max.y, min.x, max.x - min.x)
                },
            ),
        }
    }
}

#[expect(clippy::float_arithmetic, reason = "longitude wrap offset")]
fn shifted(lon: f64, offset: f64) -> f64 {
    lon + offset
}

impl Disc {
    /// Whether `coord` lies within the cap, using the haversine distance.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "great-circle distance requires trigonometry"
    )]
    pub fn contains(&self, coord: Coord<f64>) -> bool {
        let (lat1, lat2) = (self.center.y.to_radians(), coord.y.to_radians());
        let half_dlat = (lat2 - lat1) / 2.0;
        let half_dlon = (coord.x - self.center.x).to_radians() / 2.0;
        let h = half_dlat.sin().powi(2) + lat1.cos() * lat2.cos() * half_dlon.sin().powi(2);
        let angle = 2.0 * h.sqrt().min(1.0).asin();
        angle.to_degrees() <= self.radius_deg
    }

    /// Bounding rectangle of the cap.
    #[must_use]
    #[expect(
        clippy::float_arithmetic,
        reason = "cap extents require spherical trigonometry"
    )]
    pub fn bounds(&self) -> Bounds {
        let lat_lo = self.center.y - self.radius_deg;
        let lat_hi = self.center.y + self.radius_deg;
        if lat_lo <= -90.0 || lat_hi >= 90.0 || self.radius_deg >= 180.0 {
            return Bounds::full_longitude(lat_lo.max(-90.0), lat_hi.min(90.0));
        }
        let ratio = self.radius_deg.to_radians().sin() / self.center.y.to_radians().cos();
        let half_width = ratio.min(1.0).asin().to_degrees();
        Bounds::new(
            lat_lo,
            lat_hi,
            wrap_low(self.center.x - half_width),
            wrap_high(self.center.x + half_width),
        )
    }
}

impl Region {
    /// Build a region from shapes.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::Empty`] when `shapes` is empty.
    pub fn new(shapes: Vec<Shape>) -> Result<Self, RegionError> {
        if shapes.is_empty() {
            return Err(RegionError::Empty);
        }
        Ok(Self { shapes })
    }

    /// Parse `text` in the given format.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError`] describing the first malformed element.
    pub fn parse(format: RegionFormat, text: &str) -> Result<Self, RegionError> {
        format.parse(text)
    }

    /// Shapes making up the region.
    #[must_use]
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    /// Whether any shape contains `coord`.
    #[must_use]
    pub fn contains(&self, coord: Coord<f64>) -> bool {
        self.shapes.iter().any(|shape| shape.contains(coord))
    }

    /// Whether any shape might overlap `rect`.
    ///
    /// False positives are possible for discs; false negatives are not.
    #[must_use]
    pub fn intersects_rect(&self, rect: &Rect<f64>) -> bool {
        self.shapes.iter().any(|shape| shape.intersects_rect(rect))
    }

    /// Union of the bounds of every shape.
    ///
    /// Longitude arcs are merged on the circle, so the result widens across
    /// the antimeridian when a shape's bound crosses it. The union always
    /// contains every shape.
    #[must_use]
    pub fn bounds(&self) -> Bounds {
        let mut shapes = self.shapes.iter();
        let first = shapes
            .next()
            .map_or_else(|| Bounds::full_longitude(-90.0, 90.0), Shape::bounds);
        shapes.fold(first, |acc, shape| acc.union(&shape.bounds()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn disc_contains_centre_but_not_corner() {
        let region = Region::parse(RegionFormat::Disc, "0.0,0.0,1.0").expect("valid disc");
        assert!(region.contains(Coord { x: 0.0, y: 0.0 }));
        assert!(!region.contains(Coord { x: 0.9, y: 0.9 }));
    }

    #[rstest]
    fn disc_bounds_widen_with_latitude() {
        let disc = Disc {
            center: Coord { x: 10.0, y: 60.0 },
            radius_deg: 1.0,
        };
        let bounds = disc.bounds();
        assert!(bounds.lon_span() > 3.9 && bounds.lon_span() < 4.1);
        assert!((bounds.lat_hi - 61.0).abs() < 1e-9);
    }

    #[rstest]
    fn polar_disc_spans_all_longitudes() {
        let disc = Disc {
            center: Coord { x: 0.0, y: 89.5 },
            radius_deg: 1.0,
        };
        assert_eq!(disc.bounds(), Bounds::full_longitude(88.5, 90.0));
    }

    #[rstest]
    fn polygon_past_the_antimeridian_contains_wrapped_points() {
        let text = r#"{"type":"Polygon","coordinates":[[[180.0,-1.0],[180.0,1.0],[181.0,1.0],[181.0,-1.0],[180.0,-1.0]]]}"#;
        let region = Region::parse(RegionFormat::GeoJson, text).expect("valid polygon");
        assert!(region.contains(Coord { x: -179.5, y: 0.0 }));
        let bounds = region.bounds();
        assert!((bounds.lon_hi + 179.0).abs() < 1e-9);
        assert!((bounds.lon_span() - 1.0).abs() < 1e-9);
    }

    #[rstest]
    fn bounds_union_spans_all_shapes() {
        let text = r#"{"type":"MultiPolygon","coordinates":[
            [[[0.0,0.0],[0.0,1.0],[1.0,1.0],[1.0,0.0],[0.0,0.0]]],
            [[[2.0,2.0],[2.0,3.0],[3.0,3.0],[3.0,2.0],[2.0,2.0]]]
        ]}"#;
        let region = Region::parse(RegionFormat::GeoJson, text).expect("valid multipolygon");
        assert_eq!(region.bounds(), Bounds::new(0.0, 3.0, 0.0, 3.0));
    }

    #[rstest]
    fn empty_region_is_rejected() {
        assert!(matches!(Region::new(Vec::new()), Err(RegionError::Empty)));
    }
}
