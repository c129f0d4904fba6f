//! Core domain types for the Atlas geospatial store.
//!
//! The crate has no storage dependencies. It defines:
//!
//! - fixed-point [`Location`] values and their 64-bit packing;
//! - quadtree [`CellId`]s and the [`Coverer`] that approximates a
//!   [`Region`] with cells;
//! - region parsing for bbox, disc, poly and GeoJSON descriptions;
//! - the entity model ([`Point`], [`Sequence`], [`Collection`]) and
//!   [`Change`] records;
//! - the versioned payload codec (behind the `serde` feature).

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod cell;
#[cfg(feature = "serde")]
mod codec;
mod covering;
mod entity;
mod location;
mod region;

#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-support")))]
pub mod test_support;

pub use cell::{CellId, LEAF_LEVEL, MAX_LEVEL};
#[cfg(feature = "serde")]
pub use codec::{CodecError, PAYLOAD_VERSION, decode_payload, encode_payload};
pub use covering::{Coverer, QuadCoverer};
pub use entity::{
    Change, Collection, Entity, EntityKind, MemberRef, Point, PointBody, Revision, Sequence, Tags,
};
pub use location::{COORDINATE_PRECISION, Location, LocationError};
pub use region::{Bounds, Disc, Region, RegionError, RegionFormat, Shape};
