//! Command-line interface for the Atlas map store.
//!
//! Four subcommands wrap the `atlas-data` operations:
//!
//! - `expand` builds a store from an OpenStreetMap PBF snapshot;
//! - `extract` writes the closed entity set of a region as JSON Lines;
//! - `update` applies an OsmChange file in one transaction;
//! - `query` prints table statistics, single entities or metadata.
//!
//! Every option can also come from a configuration file or from
//! `ATLAS_CMDS_<COMMAND>_<OPTION>` environment variables.
#![forbid(unsafe_code)]

use std::fmt::Arguments;
use std::io::Write;

use camino::Utf8Path;
use clap::{Parser, Subcommand};

mod error;
mod expand;
mod extract;
mod query;
mod update;

pub use error::CliError;

use expand::ExpandArgs;
use extract::ExtractArgs;
use query::QueryArgs;
use update::UpdateArgs;

/// Run the Atlas CLI with the current process arguments and environment,
/// writing command output to stdout.
///
/// # Errors
///
/// Returns [`CliError`] when arguments are invalid or the command fails.
pub fn run() -> Result<(), CliError> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => {
            // `--help` and `--version` land here.
            err.print().map_err(CliError::WriteOutput)?;
            return Ok(());
        }
        Err(err) => return Err(CliError::ArgumentParsing(err)),
    };
    let mut stdout = std::io::stdout().lock();
    dispatch(cli.command, &mut stdout)
}

fn dispatch(command: Command, writer: &mut dyn Write) -> Result<(), CliError> {
    match command {
        Command::Expand(args) => expand::run_expand_with(args, writer),
        Command::Extract(args) => extract::run_extract_with(args, writer),
        Command::Update(args) => update::run_update_with(args, writer),
        Command::Query(args) => query::run_query_with(args, writer),
    }
}

/// Placeholder printed for absent metadata.
const UNKNOWN: &str = "UNKNOWN";

/// Write one line of command output.
fn write_line(writer: &mut dyn Write, line: Arguments<'_>) -> Result<(), CliError> {
    writeln!(writer, "{line}").map_err(CliError::WriteOutput)
}

/// Reject `path` unless it names an existing regular file.
fn require_file(path: &Utf8Path, field: &'static str) -> Result<(), CliError> {
    if atlas_fs::file_is_file(path) {
        Ok(())
    } else {
        Err(CliError::MissingSourceFile {
            field,
            path: path.to_path_buf(),
        })
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "atlas",
    about = "Build, query and update Atlas map stores",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Convert an OSM PBF snapshot into a new store.
    Expand(ExpandArgs),
    /// Write a regional extract from a store.
    Extract(ExtractArgs),
    /// Apply an OsmChange file to a store.
    Update(UpdateArgs),
    /// Look up entities, statistics or metadata in a store.
    Query(QueryArgs),
}

#[cfg(test)]
mod tests;
