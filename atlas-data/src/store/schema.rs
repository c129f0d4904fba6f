//! Table layout of an Atlas store.
#![forbid(unsafe_code)]

use atlas_core::EntityKind;
use rusqlite::{OptionalExtension, Transaction};

use super::StoreError;

/// Version recorded in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Table holding packed point coordinates.
pub const LOCATIONS: &str = "locations";

/// Table holding string metadata records.
pub const METADATA: &str = "metadata";

/// Multi-valued reference indices.
///
/// Each table maps a source id to every target id that references it, sorted
/// by source then target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexTable {
    /// Leaf cell id to point id.
    CellPoint,
    /// Point id to the sequences listing it.
    PointSequence,
    /// Point id to the collections listing it.
    PointCollection,
    /// Sequence id to the collections listing it.
    SequenceCollection,
    /// Collection id to the collections listing it.
    CollectionCollection,
}

impl IndexTable {
    /// All index tables in a stable order.
    pub const ALL: [Self; 5] = [
        Self::CellPoint,
        Self::PointSequence,
        Self::PointCollection,
        Self::SequenceCollection,
        Self::CollectionCollection,
    ];

    /// Name of the backing SQLite table.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CellPoint => "cell_node",
            Self::PointSequence => "node_way",
            Self::PointCollection => "node_relation",
            Self::SequenceCollection => "way_relation",
            Self::CollectionCollection => "relation_relation",
        }
    }

    /// Index recording collection members of `kind`.
    #[must_use]
    pub const fn for_collection_member(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Point => Self::PointCollection,
            EntityKind::Sequence => Self::SequenceCollection,
            EntityKind::Collection => Self::CollectionCollection,
        }
    }
}

/// Name of the payload table for `kind`.
#[must_use]
pub const fn payload_table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Point => "nodes",
        EntityKind::Sequence => "ways",
        EntityKind::Collection => "relations",
    }
}

/// Every table in the store, for statistics.
#[must_use]
pub fn all_tables() -> Vec<&'static str> {
    let mut tables = vec![
        LOCATIONS,
        payload_table(EntityKind::Point),
        payload_table(EntityKind::Sequence),
        payload_table(EntityKind::Collection),
    ];
    tables.extend(IndexTable::ALL.iter().map(|table| table.name()));
    tables.push(METADATA);
    tables
}

/// Create missing tables and check the recorded schema version.
pub(crate) fn initialise(transaction: &Transaction<'_>) -> Result<(), StoreError> {
    run_migration_step(
        transaction,
        "create locations",
        "CREATE TABLE IF NOT EXISTS locations (
            id BLOB PRIMARY KEY,
            coord INTEGER NOT NULL
        ) WITHOUT ROWID",
    )?;
    for kind in [EntityKind::Point, EntityKind::Sequence, EntityKind::Collection] {
        let table = payload_table(kind);
        run_migration_step(
            transaction,
            table,
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id BLOB PRIMARY KEY,
                    body BLOB NOT NULL
                ) WITHOUT ROWID"
            ),
        )?;
    }
    for index in IndexTable::ALL {
        let table = index.name();
        run_migration_step(
            transaction,
            table,
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    key BLOB NOT NULL,
                    value BLOB NOT NULL,
                    PRIMARY KEY (key, value)
                ) WITHOUT ROWID"
            ),
        )?;
    }
    run_migration_step(
        transaction,
        "create metadata",
        "CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        ) WITHOUT ROWID",
    )?;
    ensure_schema_version(transaction)
}

fn ensure_schema_version(transaction: &Transaction<'_>) -> Result<(), StoreError> {
    let found: Option<i64> = transaction
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .optional()
        .map_err(|source| StoreError::Migration {
            step: "read schema version",
            source,
        })?;
    match found {
        Some(version) if version == SCHEMA_VERSION => Ok(()),
        None | Some(0) => transaction
            .pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(|source| StoreError::Migration {
                step: "record schema version",
                source,
            }),
        Some(found) => Err(StoreError::VersionMismatch {
            expected: SCHEMA_VERSION,
            found,
        }),
    }
}

fn run_migration_step(
    transaction: &Transaction<'_>,
    step: &'static str,
    sql: &str,
) -> Result<(), StoreError> {
    transaction
        .execute(sql, [])
        .map(|_| ())
        .map_err(|source| StoreError::Migration { step, source })
}
