//! Storage and indexing engine for the Atlas map database.
//!
//! Responsibilities:
//! - Own the table layout of a store file and its transactional access.
//! - Build the five reference indices by external sorting during bulk load.
//! - Resolve region queries into closed entity sets.
//! - Keep the indices consistent while applying change batches.
//! - Read map interchange files into entities and changes.
//!
//! Boundaries:
//! - Geometry, cell ids and entity types live in `atlas-core`.
//! - Command-line parsing and log output belong to `atlas-cli`.
//!
//! Invariants:
//! - Index entries exist exactly for the references in current payloads.
//! - One writer at a time; readers see the snapshot of their first read.

pub mod extract;
pub mod ingest;
pub mod load;
pub mod query;
pub mod sort;
pub mod store;
pub mod update;

pub use extract::{
    ExtractError, ExtractOptions, ExtractStats, Extractor, Selection, WriteSummary,
    write_selection,
};
pub use ingest::{IngestError, PbfSummary, parse_osc, read_osc, read_pbf};
pub use load::{BulkLoader, LoadError, LoadMetadata, LoadOptions, LoadSummary};
pub use sort::{ExternalSorter, SortError, SortStats};
pub use store::{
    DupCursor, IMPORT_FILENAME, IndexTable, REPLICATION_SEQUENCE_NUMBER, REPLICATION_TIMESTAMP,
    ReadTxn, Store, StoreError, Txn, WriteTxn,
};
pub use update::{
    BatchMarker, BatchOutcome, Finish, UpdateError, UpdateReport, Updater, apply_batch,
};
