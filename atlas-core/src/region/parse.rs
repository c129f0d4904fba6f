//! Text formats accepted for region descriptions.
//!
//! Four formats are supported:
//!
//! - `bbox`: `minLat,minLon,maxLat,maxLon`. A western edge greater than the
//!   eastern edge wraps across the antimeridian.
//! - `disc`: `centerLat,centerLon,radiusDegrees`.
//! - `poly`: Osmosis polygon files. The first line names the file, each
//!   section starts with a name line (prefixed with `!` for holes), holds
//!   one `lon lat` pair per line and ends with `END`.
//! - `geojson`: `Polygon`, `MultiPolygon`, `Feature`, `FeatureCollection` and
//!   `GeometryCollection` documents.

use geo::{Coord, LineString, Polygon};
use serde_json::Value;

use super::{Bounds, Disc, Region, RegionError, Shape};

/// Supported region description formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionFormat {
    /// `minLat,minLon,maxLat,maxLon`.
    Bbox,
    /// `centerLat,centerLon,radiusDegrees`.
    Disc,
    /// Osmosis `.poly` text.
    Poly,
    /// GeoJSON geometry, feature or collection.
    GeoJson,
}

impl RegionFormat {
    /// Infer the format from a file name's extension.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::UnknownExtension`] for unrecognised names.
    pub fn from_extension(path: &str) -> Result<Self, RegionError> {
        let extension = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "bbox" => Ok(Self::Bbox),
            "disc" => Ok(Self::Disc),
            "poly" => Ok(Self::Poly),
            "json" | "geojson" => Ok(Self::GeoJson),
            _ => Err(RegionError::UnknownExtension {
                path: path.to_owned(),
            }),
        }
    }

    /// Parse `text` into a [`Region`].
    ///
    /// # Errors
    ///
    /// Returns [`RegionError`] for malformed descriptions.
    pub fn parse(self, text: &str) -> Result<Region, RegionError> {
        let shapes = match self {
            Self::Bbox => vec![parse_bbox(text)?],
            Self::Disc => vec![parse_disc(text)?],
            Self::Poly => parse_poly(text)?,
            Self::GeoJson => parse_geojson(text)?,
        };
        Region::new(shapes)
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Bbox => "bbox",
            Self::Disc => "disc",
            Self::Poly => "poly",
            Self::GeoJson => "geojson",
        }
    }
}

fn numbers<const N: usize>(format: RegionFormat, text: &str) -> Result<[f64; N], RegionError> {
    let fields: Vec<&str> = text.trim().split(',').map(str::trim).collect();
    let found = fields.len();
    let values = fields
        .into_iter()
        .map(|field| {
            field.parse::<f64>().map_err(|source| RegionError::Number {
                format: format.name(),
                value: field.to_owned(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    values.try_into().map_err(|_| RegionError::FieldCount {
        format: format.name(),
        expected: N,
        found,
    })
}

fn check_lat(value: f64) -> Result<f64, RegionError> {
    if (-90.0..=90.0).contains(&value) {
        Ok(value)
    } else {
        Err(RegionError::Latitude { value })
    }
}

fn check_lon(value: f64) -> Result<f64, RegionError> {
    if (-180.0..=180.0).contains(&value) {
        Ok(value)
    } else {
        Err(RegionError::Longitude { value })
    }
}

fn parse_bbox(text: &str) -> Result<Shape, RegionError> {
    let [raw_min_lat, min_lon, raw_max_lat, max_lon] = numbers::<4>(RegionFormat::Bbox, text)?;
    let (min_lat, max_lat) = (check_lat(raw_min_lat)?, check_lat(raw_max_lat)?);
    if min_lat > max_lat {
        return Err(RegionError::InvertedLatitude {
            min: min_lat,
            max: max_lat,
        });
    }
    Ok(Shape::Rect(Bounds::new(
        min_lat,
        max_lat,
        check_lon(min_lon)?,
        check_lon(max_lon)?,
    )))
}

fn parse_disc(text: &str) -> Result<Shape, RegionError> {
    let [lat, lon, radius] = numbers::<3>(RegionFormat::Disc, text)?;
    if !radius.is_finite() || radius < 0.0 {
        return Err(RegionError::Radius { value: radius });
    }
    Ok(Shape::Disc(Disc {
        center: Coord {
            x: check_lon(lon)?,
            y: check_lat(lat)?,
        },
        radius_deg: radius,
    }))
}

/// Close `points` into a ring, dropping a repeated final vertex.
fn ring(mut points: Vec<Coord<f64>>, index: usize) -> Result<LineString<f64>, RegionError> {
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    if points.len() < 3 {
        return Err(RegionError::DegenerateRing { ring: index });
    }
    Ok(LineString::new(points))
}

struct PolySection {
    hole: bool,
    points: Vec<Coord<f64>>,
}

fn parse_poly(text: &str) -> Result<Vec<Shape>, RegionError> {
    let mut sections: Vec<PolySection> = Vec::new();
    let mut current: Option<PolySection> = None;
    // The first line names the file.
    for (index, raw) in text.lines().enumerate().skip(1) {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if line == "END" {
            if let Some(section) = current.take() {
                sections.push(section);
            }
            continue;
        }
        match current.as_mut() {
            None => {
                current = Some(PolySection {
                    hole: line.starts_with('!'),
                    points: Vec::new(),
                });
            }
            Some(section) => section.points.push(poly_point(index + 1, line)?),
        }
    }
    if let Some(section) = current.take() {
        sections.push(section);
    }

    let mut polygons: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();
    for (index, section) in sections.into_iter().enumerate() {
        let closed = ring(section.points, index)?;
        match polygons.last_mut() {
            Some((_, holes)) if section.hole => holes.push(closed),
            _ => polygons.push((closed, Vec::new())),
        }
    }
    Ok(polygons
        .into_iter()
        .map(|(exterior, holes)| Shape::Polygon(Polygon::new(exterior, holes)))
        .collect())
}

fn poly_point(line: usize, text: &str) -> Result<Coord<f64>, RegionError> {
    let malformed = || RegionError::PolyLine {
        line,
        text: text.to_owned(),
    };
    let mut fields = text.split_whitespace();
    let (Some(lon_text), Some(lat_text), None) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(malformed());
    };
    let lon = lon_text.parse::<f64>().map_err(|_| malformed())?;
    let lat = lat_text.parse::<f64>().map_err(|_| malformed())?;
    Ok(Coord {
        x: lon,
        y: check_lat(lat)?,
    })
}

fn parse_geojson(text: &str) -> Result<Vec<Shape>, RegionError> {
    let document: Value =
        serde_json::from_str(text).map_err(|source| RegionError::Json { source })?;
    let mut shapes = Vec::new();
    collect_geometry(&document, &mut shapes)?;
    Ok(shapes)
}

fn member<'a>(value: &'a Value, name: &'static str) -> Result<&'a Value, RegionError> {
    value
        .get(name)
        .ok_or(RegionError::JsonMember { member: name })
}

fn array<'a>(value: &'a Value, name: &'static str) -> Result<&'a Vec<Value>, RegionError> {
    value
        .as_array()
        .ok_or(RegionError::JsonMember { member: name })
}

fn collect_geometry(value: &Value, shapes: &mut Vec<Shape>) -> Result<(), RegionError> {
    let kind = member(value, "type")?
        .as_str()
        .ok_or(RegionError::JsonMember { member: "type" })?;
    match kind {
        "Polygon" => shapes.push(json_polygon(member(value, "coordinates")?)?),
        "MultiPolygon" => {
            for polygon in array(member(value, "coordinates")?, "coordinates")? {
                shapes.push(json_polygon(polygon)?);
            }
        }
        "Feature" => collect_geometry(member(value, "geometry")?, shapes)?,
        "FeatureCollection" => {
            for feature in array(member(value, "features")?, "features")? {
                collect_geometry(member(feature, "geometry")?, shapes)?;
            }
        }
        "GeometryCollection" => {
            for geometry in array(member(value, "geometries")?, "geometries")? {
                collect_geometry(geometry, shapes)?;
            }
        }
        other => {
            return Err(RegionError::UnsupportedGeometry {
                kind: other.to_owned(),
            });
        }
    }
    Ok(())
}

fn json_polygon(coordinates: &Value) -> Result<Shape, RegionError> {
    let mut rings = array(coordinates, "coordinates")?
        .iter()
        .enumerate()
        .map(|(index, ring_value)| {
            let points = array(ring_value, "coordinates")?
                .iter()
                .map(json_position)
                .collect::<Result<Vec<_>, _>>()?;
            ring(points, index)
        })
        .collect::<Result<Vec<_>, _>>()?
        .into_iter();
    let exterior = rings
        .next()
        .ok_or(RegionError::JsonMember {
            member: "coordinates",
        })?;
    Ok(Shape::Polygon(Polygon::new(exterior, rings.collect())))
}

fn json_position(value: &Value) -> Result<Coord<f64>, RegionError> {
    let position = array(value, "coordinates")?;
    let axis = |index: usize| {
        position
            .get(index)
            .and_then(Value::as_f64)
            .ok_or(RegionError::JsonMember {
                member: "coordinates",
            })
    };
    Ok(Coord {
        x: axis(0)?,
        y: check_lat(axis(1)?)?,
    })
}
