//! Update command: apply an OsmChange file in one transaction.

use std::io::Write;
use std::time::{Duration, Instant};

use atlas_data::{BatchMarker, BatchOutcome, Finish, Store, apply_batch, read_osc};
use camino::Utf8PathBuf;
use chrono::DateTime;
use clap::Parser;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{CliError, UNKNOWN, require_file, write_line};

pub(crate) const ARG_UPDATE_DB: &str = "db";
pub(crate) const ARG_UPDATE_OSC: &str = "osc";
pub(crate) const ARG_UPDATE_SEQNUM: &str = "seqnum";
pub(crate) const ARG_UPDATE_TIMESTAMP: &str = "timestamp";
pub(crate) const ARG_UPDATE_COMMIT: &str = "commit";
pub(crate) const ENV_UPDATE_DB: &str = "ATLAS_CMDS_UPDATE_DB";
pub(crate) const ENV_UPDATE_OSC: &str = "ATLAS_CMDS_UPDATE_OSC";
pub(crate) const ENV_UPDATE_SEQNUM: &str = "ATLAS_CMDS_UPDATE_SEQNUM";
pub(crate) const ENV_UPDATE_TIMESTAMP: &str = "ATLAS_CMDS_UPDATE_TIMESTAMP";

/// CLI arguments for the `update` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "update",
    long_about = "Apply every create, modify and delete in an OsmChange file \
                 inside a single write transaction. Without --commit the \
                 batch is rolled back after it has been applied, which checks \
                 that it would succeed without changing the store.",
    about = "Apply an OsmChange file to a store"
)]
#[ortho_config(prefix = "ATLAS")]
pub(crate) struct UpdateArgs {
    /// Store to update.
    #[arg(long = ARG_UPDATE_DB, value_name = "path")]
    #[serde(default)]
    pub(crate) db: Option<Utf8PathBuf>,
    /// OsmChange XML file to apply.
    #[arg(long = ARG_UPDATE_OSC, value_name = "path")]
    #[serde(default)]
    pub(crate) osc: Option<Utf8PathBuf>,
    /// Replication sequence number of the change file.
    #[arg(long = ARG_UPDATE_SEQNUM, value_name = "n")]
    #[serde(default)]
    pub(crate) seqnum: Option<String>,
    /// Timestamp of the change file.
    #[arg(long = ARG_UPDATE_TIMESTAMP, value_name = "rfc3339")]
    #[serde(default)]
    pub(crate) timestamp: Option<String>,
    /// Commit the batch instead of rolling it back.
    #[arg(
        long = ARG_UPDATE_COMMIT,
        value_name = "bool",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    #[serde(default)]
    pub(crate) commit: Option<bool>,
}

impl UpdateArgs {
    pub(crate) fn into_config(self) -> Result<UpdateConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        UpdateConfig::try_from(merged)
    }
}

/// Resolved `update` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UpdateConfig {
    pub(crate) db: Utf8PathBuf,
    pub(crate) osc: Utf8PathBuf,
    pub(crate) marker: BatchMarker,
    pub(crate) finish: Finish,
}

impl TryFrom<UpdateArgs> for UpdateConfig {
    type Error = CliError;

    fn try_from(args: UpdateArgs) -> Result<Self, Self::Error> {
        let db = args.db.ok_or(CliError::MissingArgument {
            field: ARG_UPDATE_DB,
            env: ENV_UPDATE_DB,
        })?;
        let osc = args.osc.ok_or(CliError::MissingArgument {
            field: ARG_UPDATE_OSC,
            env: ENV_UPDATE_OSC,
        })?;
        let sequence_number = args.seqnum.ok_or(CliError::MissingArgument {
            field: ARG_UPDATE_SEQNUM,
            env: ENV_UPDATE_SEQNUM,
        })?;
        let timestamp = args.timestamp.ok_or(CliError::MissingArgument {
            field: ARG_UPDATE_TIMESTAMP,
            env: ENV_UPDATE_TIMESTAMP,
        })?;
        check_timestamp(ARG_UPDATE_TIMESTAMP, &timestamp)?;
        let finish = if args.commit.unwrap_or(false) {
            Finish::Commit
        } else {
            Finish::Abort
        };
        Ok(Self {
            db,
            osc,
            marker: BatchMarker {
                sequence_number,
                timestamp,
            },
            finish,
        })
    }
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<UpdateConfig, CliError> {
    let merged = UpdateArgs::merge_from_layers(layers).map_err(CliError::from)?;
    UpdateConfig::try_from(merged)
}

/// Reject timestamps that are not RFC 3339.
pub(crate) fn check_timestamp(field: &'static str, value: &str) -> Result<(), CliError> {
    DateTime::parse_from_rfc3339(value)
        .map(|_| ())
        .map_err(|source| CliError::InvalidTimestamp {
            field,
            value: value.to_owned(),
            source,
        })
}

/// What a finished update reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UpdateSummary {
    pub(crate) outcome: BatchOutcome,
    pub(crate) elapsed: Duration,
}

pub(crate) fn run_update_with(args: UpdateArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    let summary = execute_update(&config)?;
    write_update_summary(writer, &config.marker, &summary)
}

/// Parse the whole change file before the store is opened, so a malformed
/// document never starts a transaction.
pub(crate) fn execute_update(config: &UpdateConfig) -> Result<UpdateSummary, CliError> {
    let started = Instant::now();
    require_file(&config.osc, ARG_UPDATE_OSC)?;
    require_file(&config.db, ARG_UPDATE_DB)?;
    let changes = read_osc(&config.osc)?;
    let store = Store::open(&config.db)?;
    let outcome = apply_batch(&store, &changes, &config.marker, config.finish)?;
    Ok(UpdateSummary {
        outcome,
        elapsed: started.elapsed(),
    })
}

fn write_update_summary(
    writer: &mut dyn Write,
    marker: &BatchMarker,
    summary: &UpdateSummary,
) -> Result<(), CliError> {
    let outcome = &summary.outcome;
    write_line(
        writer,
        format_args!(
            "{}: {} -> {} in {:.3} seconds.",
            if outcome.committed {
                "Committed"
            } else {
                "Aborted"
            },
            outcome.previous_sequence_number.as_deref().unwrap_or(UNKNOWN),
            marker.sequence_number,
            summary.elapsed.as_secs_f64()
        ),
    )
}
