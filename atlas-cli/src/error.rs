//! Error types emitted by the Atlas CLI.
//!
//! Keep this error type reasonably small, as every command helper returns
//! `Result<_, CliError>` and the workspace enables `clippy::result_large_err`.
//! Library errors are boxed for that reason.

use std::sync::Arc;

use atlas_core::{EntityKind, RegionError};
use atlas_data::{ExtractError, IngestError, LoadError, StoreError, UpdateError};
use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors emitted by the Atlas CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        /// Long flag name of the option.
        field: &'static str,
        /// Environment variable that can supply it.
        env: &'static str,
    },
    /// A referenced input path does not exist on disk or is not a file.
    #[error("{field} path {path:?} does not exist or is not a file")]
    MissingSourceFile {
        /// Option naming the path.
        field: &'static str,
        /// Path that was checked.
        path: Utf8PathBuf,
    },
    /// `extract` needs exactly one region option.
    #[error(
        "choose exactly one of --bbox, --disc, --poly, --geojson or --region ({given} given)"
    )]
    RegionChoice {
        /// Number of region options supplied.
        given: usize,
    },
    /// A timestamp option is not RFC 3339.
    #[error("{field} {value:?} is not an RFC 3339 timestamp: {source}")]
    InvalidTimestamp {
        /// Option naming the timestamp.
        field: &'static str,
        /// Rejected text.
        value: String,
        /// Parser failure.
        #[source]
        source: chrono::ParseError,
    },
    /// `query` was given a target it does not know.
    #[error("unknown query {target:?} (expected stat, point, sequence, collection, timestamp or seqnum)")]
    UnknownQuery {
        /// Rejected target word.
        target: String,
    },
    /// An entity query was given without an id.
    #[error("query {target} needs an id")]
    MissingQueryId {
        /// Entity kind being looked up.
        target: EntityKind,
    },
    /// A queried entity is not in the store.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Kind of the missing entity.
        kind: EntityKind,
        /// Id of the missing entity.
        id: u64,
    },
    /// Reading a region description file failed.
    #[error("failed to read region file {path:?}: {source}")]
    ReadRegion {
        /// File that could not be read.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The region description is malformed.
    #[error("invalid region: {0}")]
    Region(#[from] RegionError),
    /// Creating an output file failed.
    #[error("failed to create output {path:?}: {source}")]
    CreateOutput {
        /// Output path.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// Opening or reading the store failed.
    #[error(transparent)]
    Store(Box<StoreError>),
    /// Bulk loading failed.
    #[error(transparent)]
    Load(Box<LoadError>),
    /// Reading an input file failed.
    #[error(transparent)]
    Ingest(Box<IngestError>),
    /// Extraction failed.
    #[error(transparent)]
    Extract(Box<ExtractError>),
    /// Applying a change batch failed.
    #[error(transparent)]
    Update(Box<UpdateError>),
    /// Writing command output failed.
    #[error("failed to write output: {0}")]
    WriteOutput(#[source] std::io::Error),
}

impl From<StoreError> for CliError {
    fn from(source: StoreError) -> Self {
        Self::Store(Box::new(source))
    }
}

impl From<LoadError> for CliError {
    fn from(source: LoadError) -> Self {
        Self::Load(Box::new(source))
    }
}

impl From<IngestError> for CliError {
    fn from(source: IngestError) -> Self {
        Self::Ingest(Box::new(source))
    }
}

impl From<ExtractError> for CliError {
    fn from(source: ExtractError) -> Self {
        Self::Extract(Box::new(source))
    }
}

impl From<UpdateError> for CliError {
    fn from(source: UpdateError) -> Self {
        Self::Update(Box::new(source))
    }
}
