//! OsmChange (`.osc`) reader.
//!
//! A document is a sequence of `create`, `modify` and `delete` blocks, each
//! holding `node`, `way` and `relation` elements. Creates and modifies carry
//! full entity bodies; deletes only need the id. Any malformed record fails
//! the whole document so that no partial batch reaches the store.

use camino::Utf8Path;
use chrono::DateTime;
use log::debug;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::str::FromStr;

use atlas_core::{
    Change, Collection, Entity, EntityKind, Location, MemberRef, Point, Revision, Sequence, Tags,
};

use super::{IngestError, entity_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Create,
    Modify,
    Delete,
}

#[derive(Debug)]
struct Pending {
    kind: EntityKind,
    block: Block,
    id: Option<u64>,
    location: Option<Location>,
    revision: Option<Revision>,
    tags: Tags,
    points: Vec<u64>,
    members: Vec<MemberRef>,
}

impl Pending {
    fn into_change(self) -> Result<Option<Change>, IngestError> {
        let Some(id) = self.id else {
            return Ok(None);
        };
        let wrap: fn(Entity) -> Change = match self.block {
            Block::Create => Change::Create,
            Block::Modify => Change::Modify,
            Block::Delete => {
                return Ok(Some(Change::Delete {
                    kind: self.kind,
                    id,
                }));
            }
        };
        let entity = match self.kind {
            EntityKind::Point => Entity::Point(Point {
                id,
                location: self
                    .location
                    .ok_or_else(|| IngestError::MissingAttribute {
                        element: element_name(EntityKind::Point).to_owned(),
                        name: "lat",
                    })?,
                tags: self.tags,
                revision: self.revision,
            }),
            EntityKind::Sequence => Entity::Sequence(Sequence {
                id,
                members: self.points,
                tags: self.tags,
                revision: self.revision,
            }),
            EntityKind::Collection => Entity::Collection(Collection {
                id,
                members: self.members,
                tags: self.tags,
                revision: self.revision,
            }),
        };
        Ok(Some(wrap(entity)))
    }
}

/// Attributes of one element, unescaped.
struct Attributes {
    element: &'static str,
    pairs: Vec<(String, String)>,
}

impl Attributes {
    fn read(element: &'static str, start: &BytesStart<'_>) -> Result<Self, IngestError> {
        let mut pairs = Vec::new();
        for entry in start.attributes() {
            let attribute = entry.map_err(|source| IngestError::Attribute {
                element: element.to_owned(),
                source,
            })?;
            let value = attribute
                .unescape_value()
                .map_err(|source| IngestError::Xml { source })?;
            pairs.push((
                String::from_utf8_lossy(attribute.key.as_ref()).into_owned(),
                value.into_owned(),
            ));
        }
        Ok(Self { element, pairs })
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn required(&self, name: &'static str) -> Result<&str, IngestError> {
        self.get(name).ok_or_else(|| IngestError::MissingAttribute {
            element: self.element.to_owned(),
            name,
        })
    }

    fn parse<T: FromStr>(&self, name: &'static str) -> Result<T, IngestError> {
        let value = self.required(name)?;
        value.parse().map_err(|_| IngestError::InvalidAttribute {
            element: self.element.to_owned(),
            name,
            value: value.to_owned(),
        })
    }

    fn parse_or_default<T: FromStr + Default>(&self, name: &'static str) -> Result<T, IngestError> {
        if self.get(name).is_some() {
            self.parse(name)
        } else {
            Ok(T::default())
        }
    }

    fn location(&self, id: u64) -> Result<Location, IngestError> {
        let lon: f64 = self.parse("lon")?;
        let lat: f64 = self.parse("lat")?;
        Location::from_degrees(lon, lat).map_err(|source| IngestError::Location { id, source })
    }

    /// Edit metadata, present when the element carries a version.
    fn revision(&self) -> Result<Option<Revision>, IngestError> {
        if self.get("version").is_none() {
            return Ok(None);
        }
        let timestamp = match self.get("timestamp") {
            Some(value) => DateTime::parse_from_rfc3339(value)
                .map_err(|source| IngestError::Timestamp {
                    value: value.to_owned(),
                    source,
                })?
                .timestamp(),
            None => 0,
        };
        Ok(Some(Revision {
            version: self.parse("version")?,
            timestamp,
            changeset: self.parse_or_default("changeset")?,
            uid: self.parse_or_default("uid")?,
            user: self.get("user").unwrap_or_default().to_owned(),
        }))
    }
}

const fn element_name(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Point => "node",
        EntityKind::Sequence => "way",
        EntityKind::Collection => "relation",
    }
}

fn member_kind(value: &str) -> Option<EntityKind> {
    match value {
        "node" => Some(EntityKind::Point),
        "way" => Some(EntityKind::Sequence),
        "relation" => Some(EntityKind::Collection),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct Parser {
    block: Option<Block>,
    pending: Option<Pending>,
    changes: Vec<Change>,
}

impl Parser {
    fn open(&mut self, start: &BytesStart<'_>, empty: bool) -> Result<(), IngestError> {
        match start.name().as_ref() {
            b"create" if !empty => self.block = Some(Block::Create),
            b"modify" if !empty => self.block = Some(Block::Modify),
            b"delete" if !empty => self.block = Some(Block::Delete),
            b"node" => self.begin(EntityKind::Point, start, empty)?,
            b"way" => self.begin(EntityKind::Sequence, start, empty)?,
            b"relation" => self.begin(EntityKind::Collection, start, empty)?,
            b"tag" => {
                let attributes = Attributes::read("tag", start)?;
                let key = attributes.required("k")?;
                let value = attributes.required("v")?;
                if let Some(pending) = self.pending.as_mut() {
                    pending.tags.push(key, value);
                }
            }
            b"nd" => {
                let raw: i64 = Attributes::read("nd", start)?.parse("ref")?;
                if let Some(pending) = self.pending.as_mut() {
                    pending.points.extend(entity_id(EntityKind::Point, raw));
                }
            }
            b"member" => self.member(start)?,
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &[u8]) -> Result<(), IngestError> {
        match name {
            b"node" | b"way" | b"relation" => self.finish(),
            b"create" | b"modify" | b"delete" => {
                self.block = None;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn begin(
        &mut self,
        kind: EntityKind,
        start: &BytesStart<'_>,
        empty: bool,
    ) -> Result<(), IngestError> {
        let element = element_name(kind);
        let block = self.block.ok_or_else(|| IngestError::OutsideBlock {
            element: element.to_owned(),
        })?;
        let attributes = Attributes::read(element, start)?;
        let id = entity_id(kind, attributes.parse("id")?);
        let location = match (kind, block, id) {
            (EntityKind::Point, Block::Create | Block::Modify, Some(point)) => {
                Some(attributes.location(point)?)
            }
            _ => None,
        };
        self.pending = Some(Pending {
            kind,
            block,
            id,
            location,
            revision: attributes.revision()?,
            tags: Tags::default(),
            points: Vec::new(),
            members: Vec::new(),
        });
        if empty { self.finish() } else { Ok(()) }
    }

    fn member(&mut self, start: &BytesStart<'_>) -> Result<(), IngestError> {
        let attributes = Attributes::read("member", start)?;
        let kind_text = attributes.required("type")?;
        let kind = member_kind(kind_text).ok_or_else(|| IngestError::InvalidAttribute {
            element: "member".to_owned(),
            name: "type",
            value: kind_text.to_owned(),
        })?;
        let raw: i64 = attributes.parse("ref")?;
        let role = attributes.get("role").unwrap_or_default();
        if let (Some(pending), Some(id)) = (self.pending.as_mut(), entity_id(kind, raw)) {
            pending.members.push(MemberRef::new(kind, id, role));
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), IngestError> {
        if let Some(pending) = self.pending.take() {
            self.changes.extend(pending.into_change()?);
        }
        Ok(())
    }
}

/// Parse an OsmChange document into change records, in document order.
///
/// # Errors
///
/// Returns [`IngestError`] for malformed XML, missing or unparsable
/// attributes and entities outside a change block.
///
/// # Examples
/// ```
/// use atlas_core::{Change, EntityKind};
/// use atlas_data::ingest::parse_osc;
///
/// let changes = parse_osc(r#"<osmChange><delete><node id="7"/></delete></osmChange>"#)?;
/// assert_eq!(changes, vec![Change::Delete { kind: EntityKind::Point, id: 7 }]);
/// # Ok::<(), atlas_data::ingest::IngestError>(())
/// ```
pub fn parse_osc(text: &str) -> Result<Vec<Change>, IngestError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);
    let mut parser = Parser::default();
    loop {
        match reader
            .read_event()
            .map_err(|source| IngestError::Xml { source })?
        {
            Event::Start(start) => parser.open(&start, false)?,
            Event::Empty(start) => parser.open(&start, true)?,
            Event::End(end) => parser.close(end.name().as_ref())?,
            Event::Eof => break,
            _ => {}
        }
    }
    debug!("parsed {} change records", parser.changes.len());
    Ok(parser.changes)
}

/// Read and parse the OsmChange file at `path`.
///
/// # Errors
///
/// Returns [`IngestError::Read`] when the file cannot be read, otherwise
/// the errors of [`parse_osc`].
pub fn read_osc(path: &Utf8Path) -> Result<Vec<Change>, IngestError> {
    let text = atlas_fs::read_to_string(path).map_err(|source| IngestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_osc(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const DIFF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osmChange version="0.6" generator="test">
  <create>
    <node id="1" version="1" timestamp="2024-03-01T12:00:00Z" uid="5" user="bob" changeset="9" lat="51.5" lon="-0.12">
      <tag k="amenity" v="bench"/>
    </node>
    <node id="-4" lat="0" lon="0"/>
  </create>
  <modify>
    <way id="10" version="2">
      <nd ref="1"/>
      <nd ref="2"/>
      <nd ref="-4"/>
      <tag k="name" v="Tom &amp; Jerry Lane"/>
    </way>
    <relation id="20" version="4">
      <member type="way" ref="10" role="outer"/>
      <member type="node" ref="1" role=""/>
    </relation>
  </modify>
  <delete>
    <node id="3" version="2"/>
    <way id="11"/>
  </delete>
</osmChange>
"#;

    #[rstest]
    fn parses_blocks_in_document_order() {
        let changes = parse_osc(DIFF).expect("parse diff");
        let summary: Vec<(&str, EntityKind, u64)> = changes
            .iter()
            .map(|change| {
                let label = match change {
                    Change::Create(_) => "create",
                    Change::Modify(_) => "modify",
                    Change::Delete { .. } => "delete",
                };
                (label, change.kind(), change.id())
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("create", EntityKind::Point, 1),
                ("modify", EntityKind::Sequence, 10),
                ("modify", EntityKind::Collection, 20),
                ("delete", EntityKind::Point, 3),
                ("delete", EntityKind::Sequence, 11),
            ]
        );
    }

    #[rstest]
    fn converts_bodies() {
        let changes = parse_osc(DIFF).expect("parse diff");
        let Some(Change::Create(Entity::Point(bench))) = changes.first() else {
            panic!("expected a created point first");
        };
        assert_eq!(bench.location, Location::new(-1_200_000, 515_000_000));
        assert_eq!(bench.tags.get("amenity"), Some("bench"));
        let revision = bench.revision.as_ref().expect("revision");
        assert_eq!(revision.timestamp, 1_709_294_400);
        assert_eq!((revision.uid, revision.changeset), (5, 9));
        assert_eq!(revision.user, "bob");

        let Some(Change::Modify(Entity::Sequence(lane))) = changes.get(1) else {
            panic!("expected a modified sequence second");
        };
        assert_eq!(lane.members, vec![1, 2]);
        assert_eq!(lane.tags.get("name"), Some("Tom & Jerry Lane"));

        let Some(Change::Modify(Entity::Collection(area))) = changes.get(2) else {
            panic!("expected a modified collection third");
        };
        assert_eq!(
            area.members,
            vec![
                MemberRef::new(EntityKind::Sequence, 10, "outer"),
                MemberRef::new(EntityKind::Point, 1, ""),
            ]
        );
    }

    #[rstest]
    #[case::missing_coordinate(
        r#"<osmChange><create><node id="1"/></create></osmChange>"#,
        "missing attribute"
    )]
    #[case::bad_id(
        r#"<osmChange><modify><way id="x"/></modify></osmChange>"#,
        "invalid id"
    )]
    #[case::bad_timestamp(
        r#"<osmChange><create><node id="1" version="1" timestamp="yesterday" lat="0" lon="0"/></create></osmChange>"#,
        "invalid timestamp"
    )]
    #[case::out_of_range(
        r#"<osmChange><create><node id="1" lat="95" lon="0"/></create></osmChange>"#,
        "invalid coordinate"
    )]
    #[case::bad_member_type(
        r#"<osmChange><create><relation id="1"><member type="area" ref="1"/></relation></create></osmChange>"#,
        "invalid type"
    )]
    #[case::outside_block(r#"<osmChange><node id="1" lat="0" lon="0"/></osmChange>"#, "outside")]
    #[case::mismatched_tags(r#"<osmChange><create></modify></osmChange>"#, "malformed")]
    fn malformed_documents_fail(#[case] document: &str, #[case] message: &str) {
        let err = parse_osc(document).expect_err("document should be rejected");
        assert!(
            err.to_string().contains(message),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    fn deletes_ignore_element_bodies() {
        let document = r#"<osmChange><delete>
            <node id="7" lat="1" lon="2"><tag k="shop" v="bakery"/></node>
            <relation id="8"><member type="node" ref="7" role=""/></relation>
        </delete></osmChange>"#;
        let changes = parse_osc(document).expect("parse deletes");
        assert_eq!(
            changes,
            vec![
                Change::Delete {
                    kind: EntityKind::Point,
                    id: 7,
                },
                Change::Delete {
                    kind: EntityKind::Collection,
                    id: 8,
                },
            ]
        );
    }

    #[rstest]
    fn empty_document_has_no_changes() {
        let changes = parse_osc(r#"<osmChange version="0.6"><create/></osmChange>"#)
            .expect("parse empty diff");
        assert!(changes.is_empty());
    }
}
