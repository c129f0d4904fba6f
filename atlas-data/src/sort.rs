//! External sort of `(source, target)` pairs into a reference index.
//!
//! Pairs are buffered up to a fixed capacity. A full buffer is sorted and
//! spilled to a run file of big-endian 16-byte records. [`ExternalSorter::finish`]
//! merges every run with the unspilled remainder through a min-heap, drops
//! repeated pairs and writes the result in append mode, which requires
//! strictly ascending input.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs_utf8::File;
use log::{debug, info};
use thiserror::Error;

use crate::store::{IndexTable, StoreError, Txn, WriteTxn};

/// Writes between intermediate commits during a merge.
pub const DEFAULT_COMMIT_EVERY: u64 = 8_000_000;

/// Errors raised while spilling or merging runs.
#[derive(Debug, Error)]
pub enum SortError {
    /// A run file could not be written.
    #[error("failed to write run file {path}")]
    Spill {
        /// Run file path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A run file could not be read back.
    #[error("failed to read run file {path}")]
    Read {
        /// Run file path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A run file could not be removed after the merge.
    #[error("failed to remove run file {path}")]
    Cleanup {
        /// Run file path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Writing merged pairs into the index failed.
    #[error("failed to write merged pairs into {table}")]
    Store {
        /// Destination index table.
        table: &'static str,
        /// Store failure.
        #[source]
        source: StoreError,
    },
}

/// Counters reported by a finished sort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    /// Run files spilled before the merge.
    pub runs: usize,
    /// Pairs pushed, duplicates included.
    pub pairs_in: u64,
    /// Distinct pairs written to the index.
    pub pairs_out: u64,
}

/// Memory-bounded accumulator for one reference index.
#[derive(Debug)]
pub struct ExternalSorter {
    name: String,
    scratch_dir: Utf8PathBuf,
    capacity: usize,
    buffer: Vec<(u64, u64)>,
    runs: Vec<Utf8PathBuf>,
    pairs_in: u64,
}

impl ExternalSorter {
    /// Create a sorter spilling `{name}_{NNN}.run` files into `scratch_dir`
    /// whenever `capacity` pairs are buffered.
    #[must_use]
    pub fn new(name: impl Into<String>, scratch_dir: &Utf8Path, capacity: usize) -> Self {
        Self {
            name: name.into(),
            scratch_dir: scratch_dir.to_path_buf(),
            capacity: capacity.max(1),
            buffer: Vec::with_capacity(capacity.clamp(1, 1 << 20)),
            runs: Vec::new(),
            pairs_in: 0,
        }
    }

    /// Buffer one pair, spilling the buffer when it is full.
    ///
    /// # Errors
    ///
    /// Returns [`SortError::Spill`] when the run file cannot be written.
    pub fn push(&mut self, source: u64, target: u64) -> Result<(), SortError> {
        self.buffer.push((source, target));
        self.pairs_in += 1;
        if self.buffer.len() >= self.capacity {
            self.spill()?;
        }
        Ok(())
    }

    /// Pairs pushed so far.
    #[must_use]
    pub const fn pairs_in(&self) -> u64 {
        self.pairs_in
    }

    /// Run files spilled so far.
    #[must_use]
    pub const fn runs(&self) -> usize {
        self.runs.len()
    }

    fn spill(&mut self) -> Result<(), SortError> {
        self.buffer.sort_unstable();
        let path = self
            .scratch_dir
            .join(format!("{}_{:03}.run", self.name, self.runs.len()));
        write_run(&path, &self.buffer).map_err(|source| SortError::Spill {
            path: path.clone(),
            source,
        })?;
        debug!("spilled {} pairs to {path}", self.buffer.len());
        self.buffer.clear();
        self.runs.push(path);
        Ok(())
    }

    /// Merge every run into `table`, committing every `commit_every` writes.
    ///
    /// Run files are removed once the merge has succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`SortError`] when a run cannot be read or the index write
    /// fails.
    pub fn finish(
        mut self,
        txn: &mut WriteTxn,
        table: IndexTable,
        commit_every: u64,
    ) -> Result<SortStats, SortError> {
        let store_error = |source: StoreError| SortError::Store {
            table: table.name(),
            source,
        };
        self.buffer.sort_unstable();
        let mut sources = Vec::with_capacity(self.runs.len() + 1);
        for path in &self.runs {
            let file = atlas_fs::open_utf8_file(path).map_err(|source| SortError::Read {
                path: path.clone(),
                source,
            })?;
            sources.push(RunSource::File {
                path: path.clone(),
                reader: BufReader::new(file),
            });
        }
        sources.push(RunSource::Memory(std::mem::take(&mut self.buffer).into_iter()));

        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (run, source) in sources.iter_mut().enumerate() {
            if let Some((key, value)) = source.next_pair()? {
                heap.push(Reverse((key, value, run)));
            }
        }

        let mut last: Option<(u64, u64)> = None;
        let mut pairs_out = 0_u64;
        let mut pending = 0_u64;
        while let Some(Reverse((key, value, run))) = heap.pop() {
            if let Some(source) = sources.get_mut(run) {
                if let Some((next_key, next_value)) = source.next_pair()? {
                    heap.push(Reverse((next_key, next_value, run)));
                }
            }
            if last == Some((key, value)) {
                continue;
            }
            let index = txn.index(table);
            match last {
                Some((last_key, _)) if last_key == key => index.append_dup(key, value),
                _ => index.append(key, value),
            }
            .map_err(store_error)?;
            last = Some((key, value));
            pairs_out += 1;
            pending += 1;
            if pending >= commit_every.max(1) {
                txn.checkpoint().map_err(store_error)?;
                pending = 0;
            }
        }
        drop(sources);

        for path in &self.runs {
            atlas_fs::remove_file(path).map_err(|source| SortError::Cleanup {
                path: path.clone(),
                source,
            })?;
        }
        let stats = SortStats {
            runs: self.runs.len(),
            pairs_in: self.pairs_in,
            pairs_out,
        };
        info!(
            "{}: merged {} pairs from {} runs into {} distinct entries",
            table.name(),
            stats.pairs_in,
            stats.runs,
            stats.pairs_out
        );
        Ok(stats)
    }
}

enum RunSource {
    File {
        path: Utf8PathBuf,
        reader: BufReader<File>,
    },
    Memory(std::vec::IntoIter<(u64, u64)>),
}

impl RunSource {
    fn next_pair(&mut self) -> Result<Option<(u64, u64)>, SortError> {
        match self {
            Self::Memory(pairs) => Ok(pairs.next()),
            Self::File { path, reader } => {
                read_record(reader).map_err(|source| SortError::Read {
                    path: path.clone(),
                    source,
                })
            }
        }
    }
}

#[expect(
    clippy::big_endian_bytes,
    reason = "run files use the same byte order as store keys"
)]
fn write_run(path: &Utf8Path, pairs: &[(u64, u64)]) -> io::Result<()> {
    let mut writer = BufWriter::new(atlas_fs::create_utf8_file(path)?);
    for (source, target) in pairs {
        writer.write_all(&source.to_be_bytes())?;
        writer.write_all(&target.to_be_bytes())?;
    }
    writer.flush()
}

#[expect(
    clippy::big_endian_bytes,
    reason = "run files use the same byte order as store keys"
)]
fn read_record<R: Read>(reader: &mut BufReader<R>) -> io::Result<Option<(u64, u64)>> {
    if reader.fill_buf()?.is_empty() {
        return Ok(None);
    }
    let mut source = [0_u8; 8];
    let mut target = [0_u8; 8];
    reader.read_exact(&mut source)?;
    reader.read_exact(&mut target)?;
    Ok(Some((u64::from_be_bytes(source), u64::from_be_bytes(target))))
}
