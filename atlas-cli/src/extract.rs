//! Extract command: write the closed entity set of a region.

use std::io::{BufWriter, Write};
use std::time::{Duration, Instant};

use atlas_core::{Coverer, QuadCoverer, Region, RegionFormat};
use atlas_data::{
    ExtractOptions, ExtractStats, Extractor, Store, WriteSummary, query, write_selection,
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use log::info;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{CliError, UNKNOWN, require_file, write_line};

pub(crate) const ARG_EXTRACT_DB: &str = "db";
pub(crate) const ARG_EXTRACT_OUTPUT: &str = "output";
pub(crate) const ARG_EXTRACT_BBOX: &str = "bbox";
pub(crate) const ARG_EXTRACT_DISC: &str = "disc";
pub(crate) const ARG_EXTRACT_POLY: &str = "poly";
pub(crate) const ARG_EXTRACT_GEOJSON: &str = "geojson";
pub(crate) const ARG_EXTRACT_REGION: &str = "region";
pub(crate) const ARG_EXTRACT_NESTED: &str = "nested-completeness";
pub(crate) const ENV_EXTRACT_DB: &str = "ATLAS_CMDS_EXTRACT_DB";
pub(crate) const ENV_EXTRACT_OUTPUT: &str = "ATLAS_CMDS_EXTRACT_OUTPUT";

/// CLI arguments for the `extract` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "extract",
    long_about = "Select every entity touching a region, close the selection \
                 over sequence and collection references, and write it as \
                 JSON Lines. Give the region inline with --bbox or --disc, or \
                 as a file with --poly, --geojson or --region (format taken \
                 from the extension).",
    about = "Write a regional extract from a store"
)]
#[ortho_config(prefix = "ATLAS")]
pub(crate) struct ExtractArgs {
    /// Store to read.
    #[arg(long = ARG_EXTRACT_DB, value_name = "path")]
    #[serde(default)]
    pub(crate) db: Option<Utf8PathBuf>,
    /// JSON Lines file to write.
    #[arg(long = ARG_EXTRACT_OUTPUT, value_name = "path")]
    #[serde(default)]
    pub(crate) output: Option<Utf8PathBuf>,
    /// Bounding box as `minLat,minLon,maxLat,maxLon`.
    #[arg(long = ARG_EXTRACT_BBOX, value_name = "box", allow_hyphen_values = true)]
    #[serde(default)]
    pub(crate) bbox: Option<String>,
    /// Disc as `centerLat,centerLon,radiusDegrees`.
    #[arg(long = ARG_EXTRACT_DISC, value_name = "disc", allow_hyphen_values = true)]
    #[serde(default)]
    pub(crate) disc: Option<String>,
    /// Osmosis `.poly` file.
    #[arg(long = ARG_EXTRACT_POLY, value_name = "path")]
    #[serde(default)]
    pub(crate) poly: Option<Utf8PathBuf>,
    /// GeoJSON polygon, feature or collection file.
    #[arg(long = ARG_EXTRACT_GEOJSON, value_name = "path")]
    #[serde(default)]
    pub(crate) geojson: Option<Utf8PathBuf>,
    /// Region file in any supported format, chosen by extension.
    #[arg(long = ARG_EXTRACT_REGION, value_name = "path")]
    #[serde(default)]
    pub(crate) region: Option<Utf8PathBuf>,
    /// Add the sequences of nesting collections (default true).
    #[arg(long = ARG_EXTRACT_NESTED, value_name = "bool")]
    #[serde(default)]
    pub(crate) nested_completeness: Option<bool>,
}

impl ExtractArgs {
    pub(crate) fn into_config(self) -> Result<ExtractConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ExtractConfig::try_from(merged)
    }
}

/// Where the region description comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RegionSource {
    /// Text given on the command line.
    Inline { format: RegionFormat, text: String },
    /// A file; `None` infers the format from the extension.
    File {
        field: &'static str,
        format: Option<RegionFormat>,
        path: Utf8PathBuf,
    },
}

impl RegionSource {
    /// Parse the region without touching the store.
    pub(crate) fn load(&self) -> Result<Region, CliError> {
        match self {
            Self::Inline { format, text } => Ok(format.parse(text)?),
            Self::File { field, format, path } => {
                require_file(path, *field)?;
                let resolved =
                    format.map_or_else(|| RegionFormat::from_extension(path.as_str()), Ok)?;
                let text =
                    atlas_fs::read_to_string(path).map_err(|source| CliError::ReadRegion {
                        path: path.clone(),
                        source,
                    })?;
                Ok(resolved.parse(&text)?)
            }
        }
    }
}

/// Resolved `extract` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExtractConfig {
    pub(crate) db: Utf8PathBuf,
    pub(crate) output: Utf8PathBuf,
    pub(crate) region: RegionSource,
    pub(crate) options: ExtractOptions,
}

impl TryFrom<ExtractArgs> for ExtractConfig {
    type Error = CliError;

    fn try_from(args: ExtractArgs) -> Result<Self, Self::Error> {
        let db = args.db.ok_or(CliError::MissingArgument {
            field: ARG_EXTRACT_DB,
            env: ENV_EXTRACT_DB,
        })?;
        let output = args.output.ok_or(CliError::MissingArgument {
            field: ARG_EXTRACT_OUTPUT,
            env: ENV_EXTRACT_OUTPUT,
        })?;

        let inline = [
            (RegionFormat::Bbox, args.bbox),
            (RegionFormat::Disc, args.disc),
        ]
        .into_iter()
        .filter_map(|(format, text)| {
            text.map(|found| RegionSource::Inline {
                format,
                text: found,
            })
        });
        let files = [
            (ARG_EXTRACT_POLY, Some(RegionFormat::Poly), args.poly),
            (ARG_EXTRACT_GEOJSON, Some(RegionFormat::GeoJson), args.geojson),
            (ARG_EXTRACT_REGION, None, args.region),
        ]
        .into_iter()
        .filter_map(|(field, format, path)| {
            path.map(|found| RegionSource::File {
                field,
                format,
                path: found,
            })
        });
        let sources: Vec<RegionSource> = inline.chain(files).collect();
        let [region] = <[RegionSource; 1]>::try_from(sources)
            .map_err(|given| CliError::RegionChoice { given: given.len() })?;

        let options = ExtractOptions {
            nested_completeness: args
                .nested_completeness
                .unwrap_or(ExtractOptions::default().nested_completeness),
        };
        Ok(Self {
            db,
            output,
            region,
            options,
        })
    }
}

/// What a finished extract reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ExtractReport {
    pub(crate) stats: ExtractStats,
    pub(crate) written: WriteSummary,
    pub(crate) timestamp: Option<String>,
    pub(crate) elapsed: Duration,
}

pub(crate) fn run_extract_with(args: ExtractArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    let report = execute_extract(&config)?;
    write_extract_report(writer, &config.output, &report)
}

pub(crate) fn execute_extract(config: &ExtractConfig) -> Result<ExtractReport, CliError> {
    let started = Instant::now();
    let region = config.region.load()?;
    require_file(&config.db, ARG_EXTRACT_DB)?;
    let cells = QuadCoverer::default().covering(&region);
    info!("region covered by {} cells", cells.len());

    let store = Store::open(&config.db)?;
    let txn = store.read()?;
    let timestamp = query::timestamp(&txn)?;
    let selection = Extractor::new(&txn).run(&cells, &config.options)?;

    let file = atlas_fs::ensure_parent_dir(&config.output)
        .and_then(|()| atlas_fs::create_utf8_file(&config.output))
        .map_err(|source| CliError::CreateOutput {
            path: config.output.clone(),
            source,
        })?;
    let mut out = BufWriter::new(file);
    let written = write_selection(&txn, &selection, &mut out)?;
    out.flush().map_err(CliError::WriteOutput)?;

    Ok(ExtractReport {
        stats: selection.stats(cells.len()),
        written,
        timestamp,
        elapsed: started.elapsed(),
    })
}

fn write_extract_report(
    writer: &mut dyn Write,
    output: &Utf8Path,
    report: &ExtractReport,
) -> Result<(), CliError> {
    write_line(writer, format_args!("Query cells: {}", report.stats.cells))?;
    write_line(
        writer,
        format_args!(
            "Snapshot timestamp: {}",
            report.timestamp.as_deref().unwrap_or(UNKNOWN)
        ),
    )?;
    write_line(writer, format_args!("Points: {}", report.written.points))?;
    write_line(writer, format_args!("Sequences: {}", report.written.sequences))?;
    write_line(
        writer,
        format_args!("Collections: {}", report.written.collections),
    )?;
    write_line(
        writer,
        format_args!(
            "Wrote {output} in {:.3} seconds.",
            report.elapsed.as_secs_f64()
        ),
    )
}
