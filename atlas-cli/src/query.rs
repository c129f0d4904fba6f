//! Query command: print statistics, single entities or metadata.

use std::io::Write;

use atlas_core::{EntityKind, Revision, Tags};
use atlas_data::{ReadTxn, Store, query};
use camino::Utf8PathBuf;
use clap::Parser;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{CliError, UNKNOWN, require_file, write_line};

pub(crate) const ARG_QUERY_DB: &str = "db";
pub(crate) const ENV_QUERY_DB: &str = "ATLAS_CMDS_QUERY_DB";

/// CLI arguments for the `query` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "query",
    long_about = "Without a target, print the entry count of every table \
                 followed by the replication metadata. `point`, `sequence` \
                 and `collection` (or `node`, `way` and `relation`) print one \
                 entity with its referrers; `timestamp` and `seqnum` print \
                 one metadata value.",
    about = "Look up entities, statistics or metadata in a store"
)]
#[ortho_config(prefix = "ATLAS")]
pub(crate) struct QueryArgs {
    /// Store to read.
    #[arg(long = ARG_QUERY_DB, value_name = "path")]
    #[serde(default)]
    pub(crate) db: Option<Utf8PathBuf>,
    /// What to print: stat, point, sequence, collection, timestamp or seqnum.
    #[arg(value_name = "target")]
    #[serde(default)]
    pub(crate) target: Option<String>,
    /// Entity id for point, sequence and collection lookups.
    #[arg(value_name = "id")]
    #[serde(default)]
    pub(crate) id: Option<u64>,
}

impl QueryArgs {
    pub(crate) fn into_config(self) -> Result<QueryConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        QueryConfig::try_from(merged)
    }
}

/// A single query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueryTarget {
    Stats,
    Entity(EntityKind, u64),
    Timestamp,
    SequenceNumber,
}

impl QueryTarget {
    fn parse(target: Option<&str>, id: Option<u64>) -> Result<Self, CliError> {
        let kind = match target {
            None | Some("stat" | "stats") => return Ok(Self::Stats),
            Some("timestamp") => return Ok(Self::Timestamp),
            Some("seqnum") => return Ok(Self::SequenceNumber),
            Some("point" | "node") => EntityKind::Point,
            Some("sequence" | "way") => EntityKind::Sequence,
            Some("collection" | "relation") => EntityKind::Collection,
            Some(other) => {
                return Err(CliError::UnknownQuery {
                    target: other.to_owned(),
                });
            }
        };
        let entity_id = id.ok_or(CliError::MissingQueryId { target: kind })?;
        Ok(Self::Entity(kind, entity_id))
    }
}

/// Resolved `query` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueryConfig {
    pub(crate) db: Utf8PathBuf,
    pub(crate) target: QueryTarget,
}

impl TryFrom<QueryArgs> for QueryConfig {
    type Error = CliError;

    fn try_from(args: QueryArgs) -> Result<Self, Self::Error> {
        let db = args.db.ok_or(CliError::MissingArgument {
            field: ARG_QUERY_DB,
            env: ENV_QUERY_DB,
        })?;
        let target = QueryTarget::parse(args.target.as_deref(), args.id)?;
        Ok(Self { db, target })
    }
}

pub(crate) fn run_query_with(args: QueryArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    execute_query(&config, writer)
}

pub(crate) fn execute_query(config: &QueryConfig, writer: &mut dyn Write) -> Result<(), CliError> {
    require_file(&config.db, ARG_QUERY_DB)?;
    let store = Store::open(&config.db)?;
    let txn = store.read()?;
    match config.target {
        QueryTarget::Stats => write_stats(&txn, writer),
        QueryTarget::Entity(kind, id) => write_entity(&txn, kind, id, writer),
        QueryTarget::Timestamp => {
            let timestamp = query::timestamp(&txn)?;
            write_line(
                writer,
                format_args!("{}", timestamp.as_deref().unwrap_or(UNKNOWN)),
            )
        }
        QueryTarget::SequenceNumber => {
            let sequence_number = query::sequence_number(&txn)?;
            write_line(
                writer,
                format_args!("{}", sequence_number.as_deref().unwrap_or(UNKNOWN)),
            )
        }
    }
}

fn write_stats(txn: &ReadTxn, writer: &mut dyn Write) -> Result<(), CliError> {
    for (table, entries) in query::stats(txn)? {
        write_line(writer, format_args!("{table}: {entries}"))?;
    }
    let timestamp = query::timestamp(txn)?;
    let sequence_number = query::sequence_number(txn)?;
    write_line(
        writer,
        format_args!("Timestamp: {}", timestamp.as_deref().unwrap_or(UNKNOWN)),
    )?;
    write_line(
        writer,
        format_args!(
            "Sequence #: {}",
            sequence_number.as_deref().unwrap_or(UNKNOWN)
        ),
    )
}

fn write_entity(
    txn: &ReadTxn,
    kind: EntityKind,
    id: u64,
    writer: &mut dyn Write,
) -> Result<(), CliError> {
    let missing = || CliError::NotFound { kind, id };
    match kind {
        EntityKind::Point => {
            let point = query::point(txn, id)?.ok_or_else(missing)?;
            write_line(writer, format_args!("{kind} {id}"))?;
            write_line(
                writer,
                format_args!(
                    "location: {:.7},{:.7}",
                    point.location.lon_degrees(),
                    point.location.lat_degrees()
                ),
            )?;
            write_tags(writer, &point.tags)?;
            write_revision(writer, point.revision.as_ref())?;
        }
        EntityKind::Sequence => {
            let sequence = query::sequence(txn, id)?.ok_or_else(missing)?;
            write_line(writer, format_args!("{kind} {id}"))?;
            let members: Vec<String> = sequence.members.iter().map(u64::to_string).collect();
            write_line(writer, format_args!("points: {}", members.join(" ")))?;
            write_tags(writer, &sequence.tags)?;
            write_revision(writer, sequence.revision.as_ref())?;
        }
        EntityKind::Collection => {
            let collection = query::collection(txn, id)?.ok_or_else(missing)?;
            write_line(writer, format_args!("{kind} {id}"))?;
            write_tags(writer, &collection.tags)?;
            write_revision(writer, collection.revision.as_ref())?;
            for member in &collection.members {
                write_line(
                    writer,
                    format_args!("member: {} {} {}", member.kind(), member.id(), member.role()),
                )?;
            }
        }
    }
    for (referrer_kind, referrer) in query::referrers(txn, kind, id)? {
        write_line(writer, format_args!("in {referrer_kind} {referrer}"))?;
    }
    Ok(())
}

fn write_tags(writer: &mut dyn Write, tags: &Tags) -> Result<(), CliError> {
    for (key, value) in tags.iter() {
        write_line(writer, format_args!("tag: {key}={value}"))?;
    }
    Ok(())
}

fn write_revision(writer: &mut dyn Write, revision: Option<&Revision>) -> Result<(), CliError> {
    let Some(found) = revision else {
        return Ok(());
    };
    write_line(
        writer,
        format_args!(
            "version: {} changeset: {} user: {} uid: {} timestamp: {}",
            found.version, found.changeset, found.user, found.uid, found.timestamp
        ),
    )
}
