//! Readers turning map interchange files into entities and changes.
//!
//! [`read_pbf`] streams a `.osm.pbf` snapshot into a visitor in file order,
//! which is the id-ordered stream the bulk loader expects. [`read_osc`]
//! parses an OsmChange document into the change records consumed by the
//! updater.

use camino::Utf8PathBuf;
use log::warn;
use thiserror::Error;

use atlas_core::{EntityKind, LocationError};

use crate::load::LoadError;

mod osc;
mod pbf;

pub use osc::{parse_osc, read_osc};
pub use pbf::{PbfSummary, read_pbf};

/// Errors returned while reading interchange files.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The PBF file could not be opened.
    #[error("failed to open PBF file at {path}")]
    Open {
        /// File supplied by the caller.
        path: Utf8PathBuf,
        /// Decoder error.
        #[source]
        source: osmpbf::Error,
    },
    /// A PBF block failed to decode.
    #[error("failed to decode PBF data at {path}")]
    Decode {
        /// File supplied by the caller.
        path: Utf8PathBuf,
        /// Decoder error.
        #[source]
        source: osmpbf::Error,
    },
    /// The visitor rejected an entity.
    #[error("failed to load {kind} {id}")]
    Load {
        /// Kind of the rejected entity.
        kind: EntityKind,
        /// Id of the rejected entity.
        id: u64,
        /// Loader failure.
        #[source]
        source: LoadError,
    },
    /// The change file could not be read.
    #[error("failed to read change file {path}")]
    Read {
        /// File supplied by the caller.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The change document is not well-formed XML.
    #[error("malformed change document")]
    Xml {
        /// Parser error.
        #[source]
        source: quick_xml::Error,
    },
    /// An element attribute could not be decoded.
    #[error("malformed attribute on <{element}>")]
    Attribute {
        /// Element carrying the attribute.
        element: String,
        /// Attribute error.
        #[source]
        source: quick_xml::events::attributes::AttrError,
    },
    /// A required attribute is missing.
    #[error("<{element}> is missing attribute `{name}`")]
    MissingAttribute {
        /// Element lacking the attribute.
        element: String,
        /// Attribute name.
        name: &'static str,
    },
    /// An attribute value could not be parsed.
    #[error("<{element}> has invalid {name} `{value}`")]
    InvalidAttribute {
        /// Element carrying the attribute.
        element: String,
        /// Attribute name.
        name: &'static str,
        /// Raw attribute value.
        value: String,
    },
    /// A timestamp attribute is not RFC 3339.
    #[error("invalid timestamp `{value}`")]
    Timestamp {
        /// Raw attribute value.
        value: String,
        /// Parser error.
        #[source]
        source: chrono::ParseError,
    },
    /// A point coordinate is outside the valid range.
    #[error("point {id} has an invalid coordinate")]
    Location {
        /// Point id.
        id: u64,
        /// Range error.
        #[source]
        source: LocationError,
    },
    /// An entity element appeared outside a create, modify or delete block.
    #[error("<{element}> appears outside a change block")]
    OutsideBlock {
        /// Offending element.
        element: String,
    },
}

/// Map a signed interchange id to a store id, skipping negative ids.
fn entity_id(kind: EntityKind, raw_id: i64) -> Option<u64> {
    u64::try_from(raw_id).map_or_else(
        |_| {
            warn!("skipped {kind} {raw_id}: negative identifiers are unsupported");
            None
        },
        Some,
    )
}
