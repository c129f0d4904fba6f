//! Facade crate for the Atlas map store.
//!
//! This crate re-exports the core domain types and, behind the
//! `store-sqlite` feature, the storage engine that loads, queries and
//! updates stores.

#![forbid(unsafe_code)]

pub use atlas_core::{
    Bounds, COORDINATE_PRECISION, CellId, Change, Collection, Coverer, Disc, Entity, EntityKind,
    LEAF_LEVEL, Location, LocationError, MAX_LEVEL, MemberRef, Point, PointBody, QuadCoverer,
    Region, RegionError, RegionFormat, Revision, Sequence, Shape, Tags,
};

#[cfg(feature = "serde")]
pub use atlas_core::{CodecError, PAYLOAD_VERSION, decode_payload, encode_payload};

#[cfg(feature = "store-sqlite")]
pub use atlas_data::{
    BatchMarker, BatchOutcome, BulkLoader, ExtractOptions, Extractor, Finish, LoadMetadata,
    LoadOptions, Selection, Store, StoreError, apply_batch, query, read_osc, read_pbf,
    write_selection,
};
