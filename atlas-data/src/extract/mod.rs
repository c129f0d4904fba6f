//! Region extraction with reference closure.
//!
//! Given covering cells, [`Extractor::run`] collects every point indexed
//! under them, the sequences and collections that reference those points,
//! and every collection reachable through collection nesting. Completeness
//! passes then pull in points and sequences that lie outside the region but
//! are needed to keep selected geometries whole.
//!
//! Missing referenced entities are skipped; a partial store yields a
//! partial selection, never an error.

use std::io::Write;

use log::{debug, info};
use roaring::RoaringTreemap;
use serde_json::{Map, Value, json};
use thiserror::Error;

use atlas_core::{CellId, Collection, EntityKind, LEAF_LEVEL, PointBody, Sequence, Tags};

use crate::store::{IndexTable, ReadTxn, StoreError, Txn};

/// Tag key marking a collection whose sequences form closed rings.
pub const NESTING_TAG_KEY: &str = "type";
/// Tag value marking a collection whose sequences form closed rings.
pub const NESTING_TAG_VALUE: &str = "multipolygon";

/// Errors raised while extracting or writing a selection.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Reading the store failed.
    #[error("failed to read store during extract")]
    Store {
        /// Store failure.
        #[source]
        source: StoreError,
    },
    /// A record could not be written to the output.
    #[error("failed to write extract output")]
    Write {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A record could not be serialised.
    #[error("failed to serialise {kind} {id}")]
    Serialise {
        /// Kind of the entity.
        kind: EntityKind,
        /// Entity id.
        id: u64,
        /// Serialiser failure.
        #[source]
        source: serde_json::Error,
    },
}

impl From<StoreError> for ExtractError {
    fn from(source: StoreError) -> Self {
        Self::Store { source }
    }
}

/// Switches for the optional extraction passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Add the sequences of nesting collections so their rings close.
    pub nested_completeness: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            nested_completeness: true,
        }
    }
}

/// Ids selected by an extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Selected point ids.
    pub points: RoaringTreemap,
    /// Selected sequence ids.
    pub sequences: RoaringTreemap,
    /// Selected collection ids.
    pub collections: RoaringTreemap,
}

impl Selection {
    /// Counters for logging.
    #[must_use]
    pub fn stats(&self, cells: usize) -> ExtractStats {
        ExtractStats {
            cells,
            points: self.points.len(),
            sequences: self.sequences.len(),
            collections: self.collections.len(),
        }
    }
}

/// Sizes of a selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    /// Covering cells scanned.
    pub cells: usize,
    /// Selected points.
    pub points: u64,
    /// Selected sequences.
    pub sequences: u64,
    /// Selected collections.
    pub collections: u64,
}

/// Resolves covering cells to a closed [`Selection`] inside one snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Extractor<'t> {
    txn: &'t ReadTxn,
}

impl<'t> Extractor<'t> {
    /// Extract from the snapshot held by `txn`.
    #[must_use]
    pub const fn new(txn: &'t ReadTxn) -> Self {
        Self { txn }
    }

    /// Select everything reachable from the points under `cells`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Store`] when a table read fails.
    pub fn run(&self, cells: &[CellId], options: &ExtractOptions) -> Result<Selection, ExtractError> {
        let mut selection = Selection {
            points: self.points_in_cells(cells)?,
            ..Selection::default()
        };

        let point_sequences = self.txn.index(IndexTable::PointSequence);
        let point_collections = self.txn.index(IndexTable::PointCollection);
        for point in &selection.points {
            selection.sequences.extend(point_sequences.get_all(point)?);
            selection.collections.extend(point_collections.get_all(point)?);
        }
        let sequence_collections = self.txn.index(IndexTable::SequenceCollection);
        for sequence in &selection.sequences {
            selection.collections.extend(sequence_collections.get_all(sequence)?);
        }
        self.close_collections(&mut selection.collections)?;

        let initial_sequences = selection.sequences.clone();
        self.complete_sequences(&initial_sequences, &mut selection.points)?;
        if options.nested_completeness {
            let added = self.nested_sequences(&selection.collections, &mut selection.sequences)?;
            self.complete_sequences(&added, &mut selection.points)?;
        }

        let stats = selection.stats(cells.len());
        info!(
            "extracted {} points, {} sequences and {} collections from {} cells",
            stats.points, stats.sequences, stats.collections, stats.cells
        );
        Ok(selection)
    }

    fn points_in_cells(&self, cells: &[CellId]) -> Result<RoaringTreemap, ExtractError> {
        let cursor = self.txn.index(IndexTable::CellPoint).cursor();
        let mut points = RoaringTreemap::new();
        for covering in cells {
            let cell = if covering.level() > LEAF_LEVEL {
                covering.parent(LEAF_LEVEL)
            } else {
                *covering
            };
            let begin = cell.child_begin(LEAF_LEVEL).raw();
            let end = cell.child_end(LEAF_LEVEL).raw();
            let pairs = cursor.scan_range(begin, end)?;
            debug!("cell {:#x}: {} points", cell.raw(), pairs.len());
            points.extend(pairs.into_iter().map(|(_, point)| point));
        }
        Ok(points)
    }

    /// Follow collection-to-collection references until no new id appears.
    fn close_collections(&self, collections: &mut RoaringTreemap) -> Result<(), ExtractError> {
        let parents = self.txn.index(IndexTable::CollectionCollection);
        let mut frontier = collections.clone();
        let mut rounds = 0_u32;
        while !frontier.is_empty() {
            let mut discovered = RoaringTreemap::new();
            for collection in &frontier {
                for parent in parents.get_all(collection)? {
                    if collections.insert(parent) {
                        discovered.insert(parent);
                    }
                }
            }
            rounds += 1;
            frontier = discovered;
        }
        debug!("collection closure settled after {rounds} rounds");
        Ok(())
    }

    fn complete_sequences(
        &self,
        sequences: &RoaringTreemap,
        points: &mut RoaringTreemap,
    ) -> Result<(), ExtractError> {
        let payloads = self.txn.payloads(EntityKind::Sequence);
        for id in sequences {
            if let Some(sequence) = payloads.get::<Sequence>(id)? {
                points.extend(sequence.members);
            }
        }
        Ok(())
    }

    /// Add sequence members of nesting collections, returning the ids that
    /// were not selected before.
    fn nested_sequences(
        &self,
        collections: &RoaringTreemap,
        sequences: &mut RoaringTreemap,
    ) -> Result<RoaringTreemap, ExtractError> {
        let collection_payloads = self.txn.payloads(EntityKind::Collection);
        let sequence_payloads = self.txn.payloads(EntityKind::Sequence);
        let mut added = RoaringTreemap::new();
        for id in collections {
            let Some(collection) = collection_payloads.get::<Collection>(id)? else {
                continue;
            };
            if !collection.tags.has(NESTING_TAG_KEY, NESTING_TAG_VALUE) {
                continue;
            }
            for member in collection.member_ids(EntityKind::Sequence) {
                if !sequences.contains(member) && sequence_payloads.exists(member)? {
                    sequences.insert(member);
                    added.insert(member);
                }
            }
        }
        Ok(added)
    }
}

/// Entities written by [`write_selection`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Points written.
    pub points: u64,
    /// Sequences written.
    pub sequences: u64,
    /// Collections written.
    pub collections: u64,
}

/// Write the selected entities as JSON Lines, points first, then sequences,
/// then collections, each in ascending id order.
///
/// Points without a stored coordinate and sequences or collections without
/// a payload are skipped.
///
/// # Errors
///
/// Returns [`ExtractError`] when a read, serialisation or write fails.
pub fn write_selection<W: Write>(
    txn: &ReadTxn,
    selection: &Selection,
    mut writer: W,
) -> Result<WriteSummary, ExtractError> {
    let mut summary = WriteSummary::default();

    let locations = txn.locations();
    let point_payloads = txn.payloads(EntityKind::Point);
    for id in &selection.points {
        let Some(location) = locations.get(id)? else {
            continue;
        };
        let body: PointBody = point_payloads.get(id)?.unwrap_or_default();
        let record = json!({
            "type": "point",
            "id": id,
            "lon": location.lon_degrees(),
            "lat": location.lat_degrees(),
            "tags": tags_object(&body.tags),
        });
        write_record(&mut writer, EntityKind::Point, id, &record)?;
        summary.points += 1;
    }

    let sequence_payloads = txn.payloads(EntityKind::Sequence);
    for id in &selection.sequences {
        let Some(sequence) = sequence_payloads.get::<Sequence>(id)? else {
            continue;
        };
        let record = json!({
            "type": "sequence",
            "id": id,
            "members": sequence.members,
            "tags": tags_object(&sequence.tags),
        });
        write_record(&mut writer, EntityKind::Sequence, id, &record)?;
        summary.sequences += 1;
    }

    let collection_payloads = txn.payloads(EntityKind::Collection);
    for id in &selection.collections {
        let Some(collection) = collection_payloads.get::<Collection>(id)? else {
            continue;
        };
        let members: Vec<Value> = collection
            .members
            .iter()
            .map(|member| {
                json!({
                    "type": member.kind().to_string(),
                    "ref": member.id(),
                    "role": member.role(),
                })
            })
            .collect();
        let record = json!({
            "type": "collection",
            "id": id,
            "members": members,
            "tags": tags_object(&collection.tags),
        });
        write_record(&mut writer, EntityKind::Collection, id, &record)?;
        summary.collections += 1;
    }

    writer
        .flush()
        .map_err(|source| ExtractError::Write { source })?;
    Ok(summary)
}

fn tags_object(tags: &Tags) -> Value {
    Value::Object(
        tags.iter()
            .map(|(key, value)| (key.to_owned(), Value::String(value.to_owned())))
            .collect::<Map<String, Value>>(),
    )
}

fn write_record<W: Write>(
    writer: &mut W,
    kind: EntityKind,
    id: u64,
    record: &Value,
) -> Result<(), ExtractError> {
    serde_json::to_writer(&mut *writer, record)
        .map_err(|source| ExtractError::Serialise { kind, id, source })?;
    writer
        .write_all(b"\n")
        .map_err(|source| ExtractError::Write { source })
}

#[cfg(test)]
mod tests;
