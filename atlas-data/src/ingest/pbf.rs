//! Streaming `.osm.pbf` reader.

use camino::Utf8Path;
use log::{info, warn};
use osmpbf::{DenseNode, Element, ElementReader, Info, Node, RelMemberType, Relation, Way};

use atlas_core::{
    COORDINATE_PRECISION, Collection, Entity, EntityKind, Location, MemberRef, Point, Revision,
    Sequence, Tags,
};

use super::{IngestError, entity_id};
use crate::load::LoadError;

/// Entities seen while reading a PBF file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PbfSummary {
    /// Points handed to the visitor.
    pub points: u64,
    /// Sequences handed to the visitor.
    pub sequences: u64,
    /// Collections handed to the visitor.
    pub collections: u64,
    /// Elements dropped for a negative id or invalid coordinate.
    pub skipped: u64,
}

impl PbfSummary {
    const fn record(&mut self, kind: EntityKind) {
        match kind {
            EntityKind::Point => self.points += 1,
            EntityKind::Sequence => self.sequences += 1,
            EntityKind::Collection => self.collections += 1,
        }
    }
}

/// Stream every element of the PBF file at `path` into `visit`, in file
/// order.
///
/// Elements with negative ids or out-of-range coordinates are skipped with a
/// warning, as are member references to negative ids. The first visitor
/// error stops delivery and is returned once decoding ends.
///
/// # Errors
///
/// Returns [`IngestError::Open`] or [`IngestError::Decode`] for unreadable
/// input and [`IngestError::Load`] when `visit` fails.
///
/// # Examples
/// ```no_run
/// use atlas_data::ingest::read_pbf;
/// use camino::Utf8Path;
///
/// # fn main() -> Result<(), atlas_data::ingest::IngestError> {
/// let mut count = 0_u64;
/// read_pbf(Utf8Path::new("city.osm.pbf"), |_entity| {
///     count += 1;
///     Ok(())
/// })?;
/// # Ok(())
/// # }
/// ```
pub fn read_pbf<F>(path: &Utf8Path, mut visit: F) -> Result<PbfSummary, IngestError>
where
    F: FnMut(Entity) -> Result<(), LoadError>,
{
    let reader = ElementReader::from_path(path).map_err(|source| IngestError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut summary = PbfSummary::default();
    let mut failure: Option<IngestError> = None;
    reader
        .for_each(|element| {
            if failure.is_some() {
                return;
            }
            let Some(entity) = convert(element) else {
                summary.skipped += 1;
                return;
            };
            let (kind, id) = (entity.kind(), entity.id());
            match visit(entity) {
                Ok(()) => summary.record(kind),
                Err(source) => failure = Some(IngestError::Load { kind, id, source }),
            }
        })
        .map_err(|source| IngestError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
    if let Some(error) = failure {
        return Err(error);
    }

    info!(
        "read {} points, {} sequences, {} collections from {path} ({} skipped)",
        summary.points, summary.sequences, summary.collections, summary.skipped
    );
    Ok(summary)
}

fn convert(element: Element<'_>) -> Option<Entity> {
    match element {
        Element::Node(node) => convert_node(&node).map(Entity::Point),
        Element::DenseNode(node) => convert_dense_node(&node).map(Entity::Point),
        Element::Way(way) => convert_way(&way).map(Entity::Sequence),
        Element::Relation(relation) => convert_relation(&relation).map(Entity::Collection),
    }
}

fn convert_node(node: &Node<'_>) -> Option<Point> {
    let id = entity_id(EntityKind::Point, node.id())?;
    Some(Point {
        id,
        location: location(id, node.decimicro_lon(), node.decimicro_lat())?,
        tags: Tags::from_pairs(node.tags()),
        revision: revision(&node.info()),
    })
}

fn convert_dense_node(node: &DenseNode<'_>) -> Option<Point> {
    let id = entity_id(EntityKind::Point, node.id())?;
    Some(Point {
        id,
        location: location(id, node.decimicro_lon(), node.decimicro_lat())?,
        tags: Tags::from_pairs(node.tags()),
        revision: node.info().map(|info| Revision {
            version: u32::try_from(info.version()).unwrap_or_default(),
            timestamp: info.milli_timestamp().div_euclid(1000),
            changeset: u64::try_from(info.changeset()).unwrap_or_default(),
            uid: u32::try_from(info.uid()).unwrap_or_default(),
            user: info.user().unwrap_or_default().to_owned(),
        }),
    })
}

fn convert_way(way: &Way<'_>) -> Option<Sequence> {
    let id = entity_id(EntityKind::Sequence, way.id())?;
    Some(Sequence {
        id,
        members: way
            .refs()
            .filter_map(|member| entity_id(EntityKind::Point, member))
            .collect(),
        tags: Tags::from_pairs(way.tags()),
        revision: revision(&way.info()),
    })
}

fn convert_relation(relation: &Relation<'_>) -> Option<Collection> {
    let id = entity_id(EntityKind::Collection, relation.id())?;
    let members = relation
        .members()
        .filter_map(|member| {
            let kind = match member.member_type {
                RelMemberType::Node => EntityKind::Point,
                RelMemberType::Way => EntityKind::Sequence,
                RelMemberType::Relation => EntityKind::Collection,
            };
            let member_id = entity_id(kind, member.member_id)?;
            Some(MemberRef::new(
                kind,
                member_id,
                member.role().unwrap_or_default(),
            ))
        })
        .collect();
    Some(Collection {
        id,
        members,
        tags: Tags::from_pairs(relation.tags()),
        revision: revision(&relation.info()),
    })
}

fn location(id: u64, lon: i32, lat: i32) -> Option<Location> {
    let lon_limit = 180 * COORDINATE_PRECISION;
    let lat_limit = 90 * COORDINATE_PRECISION;
    if (-lon_limit..=lon_limit).contains(&lon) && (-lat_limit..=lat_limit).contains(&lat) {
        Some(Location::new(lon, lat))
    } else {
        warn!("skipped point {id}: coordinate ({lon}, {lat}) out of range");
        None
    }
}

/// Edit metadata, when the file carries a version for the element.
fn revision(info: &Info<'_>) -> Option<Revision> {
    let version = info.version()?;
    Some(Revision {
        version: u32::try_from(version).unwrap_or_default(),
        timestamp: info
            .milli_timestamp()
            .map_or(0, |millis| millis.div_euclid(1000)),
        changeset: info
            .changeset()
            .and_then(|changeset| u64::try_from(changeset).ok())
            .unwrap_or_default(),
        uid: info
            .uid()
            .and_then(|uid| u32::try_from(uid).ok())
            .unwrap_or_default(),
        user: info
            .user()
            .and_then(Result::ok)
            .unwrap_or_default()
            .to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine as _, engine::general_purpose};
    use rstest::{fixture, rstest};
    use std::io::Write;
    use tempfile::{Builder, TempPath};

    /// Three points (one with a negative id), a footway over them and a
    /// multipolygon, encoded as an uncompressed PBF.
    const SMALL_PBF: &str = include_str!("../../tests/fixtures/small.osm.pbf.b64");

    #[fixture]
    fn small_pbf() -> TempPath {
        let cleaned: String = SMALL_PBF
            .chars()
            .filter(|ch| !ch.is_ascii_whitespace())
            .collect();
        let decoded = general_purpose::STANDARD
            .decode(cleaned.as_bytes())
            .expect("decode fixture");
        let mut file = Builder::new()
            .prefix("small")
            .suffix(".osm.pbf")
            .tempfile()
            .expect("create fixture file");
        file.write_all(&decoded).expect("write fixture");
        file.flush().expect("flush fixture");
        file.into_temp_path()
    }

    fn utf8(path: &TempPath) -> &Utf8Path {
        Utf8Path::from_path(path.as_ref()).expect("utf-8 temp path")
    }

    #[rstest]
    fn streams_entities_in_file_order(small_pbf: TempPath) {
        let mut entities = Vec::new();
        let summary = read_pbf(utf8(&small_pbf), |entity| {
            entities.push(entity);
            Ok(())
        })
        .expect("read fixture");

        assert_eq!(
            summary,
            PbfSummary {
                points: 2,
                sequences: 1,
                collections: 1,
                skipped: 1,
            }
        );
        let order: Vec<(EntityKind, u64)> = entities
            .iter()
            .map(|entity| (entity.kind(), entity.id()))
            .collect();
        assert_eq!(
            order,
            vec![
                (EntityKind::Point, 1),
                (EntityKind::Point, 2),
                (EntityKind::Sequence, 10),
                (EntityKind::Collection, 20),
            ]
        );
    }

    #[rstest]
    fn converts_bodies_and_revisions(small_pbf: TempPath) {
        let mut entities = Vec::new();
        read_pbf(utf8(&small_pbf), |entity| {
            entities.push(entity);
            Ok(())
        })
        .expect("read fixture");

        let Some(Entity::Point(cafe)) = entities.first() else {
            panic!("expected a point first");
        };
        assert_eq!(cafe.location, Location::new(-1_200_000, 515_000_000));
        assert_eq!(cafe.tags.get("amenity"), Some("cafe"));
        let revision = cafe.revision.as_ref().expect("revision");
        assert_eq!(
            (revision.version, revision.changeset, revision.uid),
            (3, 42, 7)
        );
        assert_eq!(revision.timestamp, 1_700_000_000);
        assert_eq!(revision.user, "alice");

        let Some(Entity::Sequence(footway)) = entities.get(2) else {
            panic!("expected a sequence third");
        };
        assert_eq!(footway.members, vec![1, 2]);

        let Some(Entity::Collection(area)) = entities.get(3) else {
            panic!("expected a collection last");
        };
        assert!(area.tags.has("type", "multipolygon"));
        assert_eq!(
            area.members,
            vec![
                MemberRef::new(EntityKind::Point, 1, "label"),
                MemberRef::new(EntityKind::Sequence, 10, "outer"),
            ]
        );
    }

    #[rstest]
    fn visitor_errors_stop_delivery(small_pbf: TempPath) {
        let mut seen = 0;
        let err = read_pbf(utf8(&small_pbf), |entity| {
            seen += 1;
            Err(LoadError::OutOfOrder {
                kind: entity.kind(),
                id: entity.id(),
                last_kind: EntityKind::Point,
                last_id: 0,
            })
        })
        .expect_err("visitor failure should surface");
        assert_eq!(seen, 1);
        assert!(matches!(err, IngestError::Load { id: 1, .. }));
    }

    #[rstest]
    fn missing_file_reports_open_error() {
        let err = read_pbf(Utf8Path::new("/nonexistent/missing.osm.pbf"), |_| Ok(()))
            .expect_err("missing file");
        match err {
            IngestError::Open { path, .. } => assert!(path.ends_with("missing.osm.pbf")),
            other => panic!("expected open error, got {other:?}"),
        }
    }

    #[rstest]
    #[case(1_800_000_001, 0)]
    #[case(0, -900_000_001)]
    fn out_of_range_coordinates_are_skipped(#[case] lon: i32, #[case] lat: i32) {
        assert_eq!(location(5, lon, lat), None);
    }
}
