//! Expand command: build a store from an OpenStreetMap PBF snapshot.

use std::io::Write;
use std::time::{Duration, Instant};

use atlas_data::{BulkLoader, LoadMetadata, LoadOptions, LoadSummary, Store, read_pbf};
use camino::Utf8PathBuf;
use clap::Parser;
use log::info;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{CliError, UNKNOWN, require_file, write_line};

pub(crate) const ARG_EXPAND_INPUT: &str = "input";
pub(crate) const ARG_EXPAND_OUTPUT: &str = "output";
pub(crate) const ARG_EXPAND_SCRATCH_DIR: &str = "scratch-dir";
pub(crate) const ARG_EXPAND_SORT_CAPACITY: &str = "sort-capacity";
pub(crate) const ARG_EXPAND_SEQNUM: &str = "seqnum";
pub(crate) const ARG_EXPAND_TIMESTAMP: &str = "timestamp";
pub(crate) const ENV_EXPAND_INPUT: &str = "ATLAS_CMDS_EXPAND_INPUT";
pub(crate) const ENV_EXPAND_OUTPUT: &str = "ATLAS_CMDS_EXPAND_OUTPUT";

/// CLI arguments for the `expand` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "expand",
    long_about = "Stream an OSM PBF snapshot into a new store. Points, \
                 sequences and collections must arrive in kind then id \
                 order, as planet dumps and most extracts do. Reference \
                 indices are built with an external sort whose run files \
                 go to the scratch directory.",
    about = "Convert an OSM PBF snapshot into a new store"
)]
#[ortho_config(prefix = "ATLAS")]
pub(crate) struct ExpandArgs {
    /// PBF snapshot to read.
    #[arg(long = ARG_EXPAND_INPUT, value_name = "path")]
    #[serde(default)]
    pub(crate) input: Option<Utf8PathBuf>,
    /// Store file to create; it must not exist yet.
    #[arg(long = ARG_EXPAND_OUTPUT, value_name = "path")]
    #[serde(default)]
    pub(crate) output: Option<Utf8PathBuf>,
    /// Directory for sort run files (a temporary directory by default).
    #[arg(long = ARG_EXPAND_SCRATCH_DIR, value_name = "dir")]
    #[serde(default)]
    pub(crate) scratch_dir: Option<Utf8PathBuf>,
    /// Reference pairs buffered per index before a run is spilled.
    #[arg(long = ARG_EXPAND_SORT_CAPACITY, value_name = "pairs")]
    #[serde(default)]
    pub(crate) sort_capacity: Option<usize>,
    /// Replication sequence number of the snapshot.
    #[arg(long = ARG_EXPAND_SEQNUM, value_name = "n")]
    #[serde(default)]
    pub(crate) seqnum: Option<String>,
    /// Snapshot timestamp; the newest entity timestamp when omitted.
    #[arg(long = ARG_EXPAND_TIMESTAMP, value_name = "rfc3339")]
    #[serde(default)]
    pub(crate) timestamp: Option<String>,
}

impl ExpandArgs {
    pub(crate) fn into_config(self) -> Result<ExpandConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ExpandConfig::try_from(merged)
    }
}

/// Resolved `expand` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExpandConfig {
    pub(crate) input: Utf8PathBuf,
    pub(crate) output: Utf8PathBuf,
    pub(crate) options: LoadOptions,
    pub(crate) metadata: LoadMetadata,
}

impl TryFrom<ExpandArgs> for ExpandConfig {
    type Error = CliError;

    fn try_from(args: ExpandArgs) -> Result<Self, Self::Error> {
        let input = args.input.ok_or(CliError::MissingArgument {
            field: ARG_EXPAND_INPUT,
            env: ENV_EXPAND_INPUT,
        })?;
        let output = args.output.ok_or(CliError::MissingArgument {
            field: ARG_EXPAND_OUTPUT,
            env: ENV_EXPAND_OUTPUT,
        })?;
        if let Some(timestamp) = &args.timestamp {
            crate::update::check_timestamp(ARG_EXPAND_TIMESTAMP, timestamp)?;
        }

        let defaults = LoadOptions::default();
        let options = LoadOptions {
            sort_capacity: args.sort_capacity.unwrap_or(defaults.sort_capacity),
            commit_every: defaults.commit_every,
            scratch_dir: args.scratch_dir,
        };
        let metadata = LoadMetadata {
            timestamp: args.timestamp,
            sequence_number: args.seqnum,
            import_filename: input.file_name().map(str::to_owned),
        };
        Ok(Self {
            input,
            output,
            options,
            metadata,
        })
    }
}

/// What a finished expand reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExpandReport {
    pub(crate) summary: LoadSummary,
    pub(crate) skipped: u64,
    pub(crate) elapsed: Duration,
}

pub(crate) fn run_expand_with(args: ExpandArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    let report = execute_expand(&config)?;
    write_expand_report(writer, &report)
}

pub(crate) fn execute_expand(config: &ExpandConfig) -> Result<ExpandReport, CliError> {
    require_file(&config.input, ARG_EXPAND_INPUT)?;
    let started = Instant::now();
    let store = Store::create(&config.output)?;
    let mut loader = BulkLoader::new(&store, config.options.clone())?;
    let read = read_pbf(&config.input, |entity| loader.add(&entity))?;
    let summary = loader.finish(&config.metadata)?;
    info!("expanded {} into {}", config.input, config.output);
    Ok(ExpandReport {
        summary,
        skipped: read.skipped,
        elapsed: started.elapsed(),
    })
}

fn write_expand_report(writer: &mut dyn Write, report: &ExpandReport) -> Result<(), CliError> {
    let summary = &report.summary;
    write_line(
        writer,
        format_args!(
            "Points: {} ({} tagged)",
            summary.points, summary.tagged_points
        ),
    )?;
    write_line(writer, format_args!("Sequences: {}", summary.sequences))?;
    write_line(writer, format_args!("Collections: {}", summary.collections))?;
    write_line(writer, format_args!("Skipped: {}", report.skipped))?;
    write_line(
        writer,
        format_args!(
            "Timestamp: {}",
            summary.timestamp.as_deref().unwrap_or(UNKNOWN)
        ),
    )?;
    write_line(
        writer,
        format_args!(
            "Finished expand in {:.3} seconds.",
            report.elapsed.as_secs_f64()
        ),
    )
}
