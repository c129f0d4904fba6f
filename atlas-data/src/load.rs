//! Bulk construction of a store from an id-ordered entity stream.
//!
//! Coordinates and payloads are appended directly. Reference pairs go to
//! one [`ExternalSorter`] per index and are merged into the store by
//! [`BulkLoader::finish`]. A failed load leaves a partial store behind; it
//! must be re-run against a fresh path.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use tempfile::TempDir;
use thiserror::Error;

use atlas_core::{CellId, Entity, EntityKind};

use crate::sort::{DEFAULT_COMMIT_EVERY, ExternalSorter, SortError, SortStats};
use crate::store::{
    IMPORT_FILENAME, IndexTable, REPLICATION_SEQUENCE_NUMBER, REPLICATION_TIMESTAMP, Store,
    StoreError, Txn, WriteTxn,
};

/// Pairs buffered per index before a run is spilled.
pub const DEFAULT_SORT_CAPACITY: usize = 4_000_000;

/// Tuning knobs for a bulk load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Pairs buffered per index before spilling.
    pub sort_capacity: usize,
    /// Writes between intermediate commits.
    pub commit_every: u64,
    /// Directory for run files; a temporary directory when `None`.
    pub scratch_dir: Option<Utf8PathBuf>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            sort_capacity: DEFAULT_SORT_CAPACITY,
            commit_every: DEFAULT_COMMIT_EVERY,
            scratch_dir: None,
        }
    }
}

/// Metadata recorded when a load finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadMetadata {
    /// Snapshot timestamp; defaults to the newest entity revision.
    pub timestamp: Option<String>,
    /// Replication sequence marker of the snapshot.
    pub sequence_number: Option<String>,
    /// File the entities were read from.
    pub import_filename: Option<String>,
}

/// Totals reported by [`BulkLoader::finish`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Points loaded.
    pub points: u64,
    /// Points that carried tags and therefore a payload.
    pub tagged_points: u64,
    /// Sequences loaded.
    pub sequences: u64,
    /// Collections loaded.
    pub collections: u64,
    /// Sort counters per index.
    pub indices: Vec<(IndexTable, SortStats)>,
    /// Timestamp written to the metadata table.
    pub timestamp: Option<String>,
}

/// Errors raised during a bulk load.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The input stream violated kind or id ordering.
    #[error("{kind} {id} arrived after {last_kind} {last_id}")]
    OutOfOrder {
        /// Kind of the rejected entity.
        kind: EntityKind,
        /// Id of the rejected entity.
        id: u64,
        /// Kind of the previous entity.
        last_kind: EntityKind,
        /// Id of the previous entity.
        last_id: u64,
    },
    /// The scratch directory could not be prepared.
    #[error("failed to prepare scratch directory")]
    Scratch {
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A store write failed.
    #[error("store write failed during bulk load")]
    Store {
        /// Store failure.
        #[source]
        source: StoreError,
    },
    /// Spilling or merging an index failed.
    #[error("external sort failed during bulk load")]
    Sort {
        /// Sort failure.
        #[source]
        source: SortError,
    },
}

impl From<StoreError> for LoadError {
    fn from(source: StoreError) -> Self {
        Self::Store { source }
    }
}

impl From<SortError> for LoadError {
    fn from(source: SortError) -> Self {
        Self::Sort { source }
    }
}

#[derive(Debug)]
struct Sorters {
    cell_point: ExternalSorter,
    point_sequence: ExternalSorter,
    point_collection: ExternalSorter,
    sequence_collection: ExternalSorter,
    collection_collection: ExternalSorter,
}

impl Sorters {
    fn new(scratch_dir: &Utf8Path, capacity: usize) -> Self {
        let sorter = |table: IndexTable| ExternalSorter::new(table.name(), scratch_dir, capacity);
        Self {
            cell_point: sorter(IndexTable::CellPoint),
            point_sequence: sorter(IndexTable::PointSequence),
            point_collection: sorter(IndexTable::PointCollection),
            sequence_collection: sorter(IndexTable::SequenceCollection),
            collection_collection: sorter(IndexTable::CollectionCollection),
        }
    }

    const fn get_mut(&mut self, table: IndexTable) -> &mut ExternalSorter {
        match table {
            IndexTable::CellPoint => &mut self.cell_point,
            IndexTable::PointSequence => &mut self.point_sequence,
            IndexTable::PointCollection => &mut self.point_collection,
            IndexTable::SequenceCollection => &mut self.sequence_collection,
            IndexTable::CollectionCollection => &mut self.collection_collection,
        }
    }

    fn into_tables(self) -> [(IndexTable, ExternalSorter); 5] {
        [
            (IndexTable::CellPoint, self.cell_point),
            (IndexTable::PointSequence, self.point_sequence),
            (IndexTable::PointCollection, self.point_collection),
            (IndexTable::SequenceCollection, self.sequence_collection),
            (IndexTable::CollectionCollection, self.collection_collection),
        ]
    }
}

/// Streams entities into a freshly created store.
///
/// Entities must arrive as points, then sequences, then collections, with
/// strictly ascending ids within each kind.
///
/// # Examples
///
/// ```no_run
/// use atlas_core::test_support::point_at;
/// use atlas_data::{BulkLoader, LoadMetadata, LoadOptions, Store};
/// use camino::Utf8Path;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Store::create(Utf8Path::new("planet.atlas"))?;
/// let mut loader = BulkLoader::new(&store, LoadOptions::default())?;
/// loader.add(&point_at(1, 13.4, 52.5).into())?;
/// let summary = loader.finish(&LoadMetadata::default())?;
/// assert_eq!(summary.points, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct BulkLoader {
    txn: WriteTxn,
    sorters: Sorters,
    commit_every: u64,
    pending: u64,
    last: Option<(EntityKind, u64)>,
    summary: LoadSummary,
    newest_timestamp: Option<i64>,
    _scratch: Option<TempDir>,
}

impl BulkLoader {
    /// Take the store's write lock and prepare the sorters.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] when the scratch directory or write
    /// transaction cannot be created.
    pub fn new(store: &Store, options: LoadOptions) -> Result<Self, LoadError> {
        let (scratch_dir, scratch) = match options.scratch_dir {
            Some(dir) => {
                atlas_fs::ensure_dir(&dir).map_err(|source| LoadError::Scratch { source })?;
                (dir, None)
            }
            None => {
                let temp = TempDir::new().map_err(|source| LoadError::Scratch { source })?;
                let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).map_err(|path| {
                    LoadError::Scratch {
                        source: std::io::Error::other(format!(
                            "scratch directory {} is not UTF-8",
                            path.display()
                        )),
                    }
                })?;
                (dir, Some(temp))
            }
        };
        let txn = store.write()?;
        Ok(Self {
            txn,
            sorters: Sorters::new(&scratch_dir, options.sort_capacity),
            commit_every: options.commit_every.max(1),
            pending: 0,
            last: None,
            summary: LoadSummary::default(),
            newest_timestamp: None,
            _scratch: scratch,
        })
    }

    /// Load one entity.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::OutOfOrder`] when the entity breaks the stream
    /// ordering, or a store or sort error when a write fails.
    pub fn add(&mut self, entity: &Entity) -> Result<(), LoadError> {
        self.check_order(entity.kind(), entity.id())?;
        match entity {
            Entity::Point(point) => {
                self.txn.locations().append(point.id, point.location)?;
                if point.is_tagged() {
                    self.txn
                        .payloads(EntityKind::Point)
                        .append(point.id, &point.body())?;
                    self.summary.tagged_points += 1;
                }
                self.sorters
                    .get_mut(IndexTable::CellPoint)
                    .push(CellId::leaf(point.location).raw(), point.id)?;
                self.observe(point.revision.as_ref().map(|revision| revision.timestamp));
                self.summary.points += 1;
            }
            Entity::Sequence(sequence) => {
                self.txn
                    .payloads(EntityKind::Sequence)
                    .append(sequence.id, sequence)?;
                let sorter = self.sorters.get_mut(IndexTable::PointSequence);
                for member in &sequence.members {
                    sorter.push(*member, sequence.id)?;
                }
                self.observe(sequence.revision.as_ref().map(|revision| revision.timestamp));
                self.summary.sequences += 1;
            }
            Entity::Collection(collection) => {
                self.txn
                    .payloads(EntityKind::Collection)
                    .append(collection.id, collection)?;
                for member in &collection.members {
                    self.sorters
                        .get_mut(IndexTable::for_collection_member(member.kind()))
                        .push(member.id(), collection.id)?;
                }
                self.observe(collection.revision.as_ref().map(|revision| revision.timestamp));
                self.summary.collections += 1;
            }
        }
        self.pending += 1;
        if self.pending >= self.commit_every {
            self.txn.checkpoint()?;
            self.pending = 0;
        }
        Ok(())
    }

    /// Merge every index, record `metadata` and commit.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] when a merge or the final commit fails.
    pub fn finish(self, metadata: &LoadMetadata) -> Result<LoadSummary, LoadError> {
        let Self {
            mut txn,
            sorters,
            commit_every,
            mut summary,
            newest_timestamp,
            _scratch,
            ..
        } = self;
        txn.checkpoint()?;
        info!(
            "loaded {} points ({} tagged), {} sequences and {} collections",
            summary.points, summary.tagged_points, summary.sequences, summary.collections
        );

        for (table, sorter) in sorters.into_tables() {
            let stats = sorter.finish(&mut txn, table, commit_every)?;
            summary.indices.push((table, stats));
        }

        let timestamp = metadata
            .timestamp
            .clone()
            .or_else(|| newest_timestamp.and_then(format_timestamp));
        let records = [
            (REPLICATION_TIMESTAMP, timestamp.as_deref()),
            (
                REPLICATION_SEQUENCE_NUMBER,
                metadata.sequence_number.as_deref(),
            ),
            (IMPORT_FILENAME, metadata.import_filename.as_deref()),
        ];
        for (key, value) in records {
            if let Some(value) = value {
                txn.metadata().put(key, value)?;
            }
        }
        txn.commit()?;
        summary.timestamp = timestamp;
        Ok(summary)
    }

    fn check_order(&mut self, kind: EntityKind, id: u64) -> Result<(), LoadError> {
        if let Some((last_kind, last_id)) = self.last {
            if kind < last_kind || (kind == last_kind && id <= last_id) {
                return Err(LoadError::OutOfOrder {
                    kind,
                    id,
                    last_kind,
                    last_id,
                });
            }
        }
        self.last = Some((kind, id));
        Ok(())
    }

    fn observe(&mut self, timestamp: Option<i64>) {
        if let Some(timestamp) = timestamp {
            let newest = self
                .newest_timestamp
                .map_or(timestamp, |seen| seen.max(timestamp));
            self.newest_timestamp = Some(newest);
        }
    }
}

/// Format epoch seconds as an RFC 3339 UTC timestamp.
pub(crate) fn format_timestamp(seconds: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .map(|instant| instant.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{METADATA, ReadTxn};
    use atlas_core::test_support::{collection, point_at, sequence, tagged_point_at};
    use atlas_core::{Location, PointBody, Revision, Sequence};
    use rstest::{fixture, rstest};

    struct Scratch {
        _dir: TempDir,
        root: Utf8PathBuf,
        store: Store,
    }

    #[fixture]
    fn scratch() -> Scratch {
        let dir = TempDir::new().expect("create temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
        let store = Store::create(&root.join("atlas.db")).expect("create store");
        Scratch {
            _dir: dir,
            root,
            store,
        }
    }

    fn small_options(root: &Utf8Path) -> LoadOptions {
        LoadOptions {
            sort_capacity: 2,
            commit_every: 3,
            scratch_dir: Some(root.join("scratch")),
        }
    }

    fn load(store: &Store, options: LoadOptions, entities: Vec<Entity>) -> LoadSummary {
        let mut loader = BulkLoader::new(store, options).expect("loader");
        for entity in &entities {
            loader.add(entity).expect("add entity");
        }
        loader.finish(&LoadMetadata::default()).expect("finish")
    }

    fn index(txn: &ReadTxn, table: IndexTable) -> Vec<(u64, u64)> {
        txn.index(table)
            .cursor()
            .scan_range(0, u64::MAX)
            .expect("scan")
    }

    #[rstest]
    fn builds_payloads_and_indices(scratch: Scratch) {
        let mut dated = tagged_point_at(2, 1.0, 1.0, "amenity", "cafe");
        dated.revision = Some(Revision {
            timestamp: 1_700_000_000,
            ..Revision::default()
        });
        let entities: Vec<Entity> = vec![
            point_at(1, 0.0, 0.0).into(),
            dated.into(),
            point_at(3, 2.0, 2.0).into(),
            sequence(10, &[1, 2, 3, 2]).into(),
            sequence(11, &[3]).into(),
            collection(20, &[(EntityKind::Point, 1), (EntityKind::Sequence, 10)]).into(),
            collection(21, &[(EntityKind::Collection, 20)]).into(),
        ];
        let summary = load(&scratch.store, small_options(&scratch.root), entities);
        assert_eq!(summary.points, 3);
        assert_eq!(summary.tagged_points, 1);
        assert_eq!(summary.timestamp.as_deref(), Some("2023-11-14T22:13:20Z"));

        let txn = scratch.store.read().expect("read txn");
        assert!(txn.payloads(EntityKind::Point).get_raw(1).expect("get").is_none());
        let body: Option<PointBody> = txn.payloads(EntityKind::Point).get(2).expect("get");
        assert_eq!(body.expect("tagged payload").tags.get("amenity"), Some("cafe"));
        let stored: Option<Sequence> = txn.payloads(EntityKind::Sequence).get(10).expect("get");
        assert_eq!(stored.map(|s| s.members), Some(vec![1, 2, 3, 2]));

        assert_eq!(
            index(&txn, IndexTable::PointSequence),
            vec![(1, 10), (2, 10), (3, 10), (3, 11)]
        );
        assert_eq!(index(&txn, IndexTable::PointCollection), vec![(1, 20)]);
        assert_eq!(index(&txn, IndexTable::SequenceCollection), vec![(10, 20)]);
        assert_eq!(index(&txn, IndexTable::CollectionCollection), vec![(20, 21)]);

        let cells = index(&txn, IndexTable::CellPoint);
        assert_eq!(cells.len(), 3);
        let leaf = CellId::leaf(Location::from_degrees(2.0, 2.0).expect("valid coordinate"));
        assert!(cells.contains(&(leaf.raw(), 3)));
        assert_eq!(
            txn.metadata().get(REPLICATION_TIMESTAMP).expect("metadata"),
            Some("2023-11-14T22:13:20Z".to_owned())
        );
        assert!(txn.count(METADATA).expect("count") >= 1);
    }

    #[rstest]
    #[case::kind_regression(
        vec![sequence(1, &[]).into(), point_at(2, 0.0, 0.0).into()],
        EntityKind::Point,
        2
    )]
    #[case::repeated_id(
        vec![point_at(5, 0.0, 0.0).into(), point_at(5, 1.0, 1.0).into()],
        EntityKind::Point,
        5
    )]
    #[case::descending_id(
        vec![collection(9, &[]).into(), collection(8, &[]).into()],
        EntityKind::Collection,
        8
    )]
    fn rejects_out_of_order_input(
        scratch: Scratch,
        #[case] entities: Vec<Entity>,
        #[case] kind: EntityKind,
        #[case] id: u64,
    ) {
        let mut loader =
            BulkLoader::new(&scratch.store, LoadOptions::default()).expect("loader");
        let mut entities = entities.into_iter();
        let first = entities.next().expect("first entity");
        loader.add(&first).expect("first entity loads");
        let second = entities.next().expect("second entity");
        let err = loader.add(&second).expect_err("ordering violated");
        assert!(matches!(
            err,
            LoadError::OutOfOrder { kind: k, id: i, .. } if k == kind && i == id
        ));
    }

    #[rstest]
    fn explicit_metadata_wins(scratch: Scratch) {
        let mut loader =
            BulkLoader::new(&scratch.store, small_options(&scratch.root)).expect("loader");
        loader.add(&point_at(1, 0.0, 0.0).into()).expect("add");
        loader
            .finish(&LoadMetadata {
                timestamp: Some("2024-01-01T00:00:00Z".into()),
                sequence_number: Some("42".into()),
                import_filename: Some("planet.osm.pbf".into()),
            })
            .expect("finish");

        let txn = scratch.store.read().expect("read txn");
        let metadata = txn.metadata();
        assert_eq!(
            metadata.get(REPLICATION_SEQUENCE_NUMBER).expect("get"),
            Some("42".to_owned())
        );
        assert_eq!(
            metadata.get(IMPORT_FILENAME).expect("get"),
            Some("planet.osm.pbf".to_owned())
        );
    }
}
