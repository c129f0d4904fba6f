//! Scratch workspaces, the sample snapshot and output capture.

use super::*;
use crate::expand::{ExpandArgs, run_expand_with};
use base64::{Engine as _, engine::general_purpose};
use camino::Utf8PathBuf;
use std::fs;
use tempfile::TempDir;

/// Two points, a footway over them and a multipolygon; one further point
/// has a negative id and is skipped.
const SMALL_PBF: &str = include_str!("../../tests/fixtures/small.osm.pbf.b64");

/// Retags point 1 from a cafe to a pub.
pub(super) const RETAG_OSC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osmChange version="0.6">
  <modify>
    <node id="1" version="4" timestamp="2024-03-01T12:00:00Z" changeset="43" uid="7" user="alice" lat="51.5" lon="-0.12">
      <tag k="amenity" v="pub"/>
    </node>
  </modify>
</osmChange>
"#;

#[derive(Debug)]
pub(super) struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    pub(super) fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 workspace");
        Self { _dir: dir, root }
    }

    pub(super) fn path(&self, name: &str) -> Utf8PathBuf {
        self.root.join(name)
    }

    pub(super) fn write(&self, name: &str, contents: &str) -> Utf8PathBuf {
        let path = self.path(name);
        fs::write(&path, contents).expect("write workspace file");
        path
    }

    pub(super) fn small_pbf(&self) -> Utf8PathBuf {
        let cleaned: String = SMALL_PBF
            .chars()
            .filter(|ch| !ch.is_ascii_whitespace())
            .collect();
        let decoded = general_purpose::STANDARD
            .decode(cleaned.as_bytes())
            .expect("decode fixture");
        let path = self.path("small.osm.pbf");
        fs::write(&path, decoded).expect("write fixture");
        path
    }

    /// Expand the sample snapshot into `atlas.db`, recording `seqnum`.
    pub(super) fn expand_sample(&self, seqnum: &str) -> Utf8PathBuf {
        let output = self.path("atlas.db");
        let args = ExpandArgs {
            input: Some(self.small_pbf()),
            output: Some(output.clone()),
            seqnum: Some(seqnum.to_owned()),
            ..ExpandArgs::default()
        };
        capture(|writer| run_expand_with(args, writer)).expect("expand sample");
        output
    }
}

/// Run a command and return what it printed.
pub(super) fn capture<F>(command: F) -> Result<String, CliError>
where
    F: FnOnce(&mut dyn Write) -> Result<(), CliError>,
{
    let mut buffer = Vec::new();
    command(&mut buffer)?;
    Ok(String::from_utf8(buffer).expect("utf-8 output"))
}
