//! Transactional key-value façade over SQLite.
//!
//! A [`Store`] is a single SQLite file in WAL mode. Writers take the
//! database's one write lock with `BEGIN IMMEDIATE`; readers pin a snapshot
//! as of their first read and never block, nor are blocked by, the writer.
//! Every table uses 8-byte big-endian blob keys so byte order equals numeric
//! order.
//!
//! Transactions are guard objects: [`WriteTxn::commit`] consumes the guard,
//! and dropping an uncommitted guard rolls back.
#![forbid(unsafe_code)]

mod cursor;
mod keys;
mod schema;
mod tables;

use std::time::Duration;

use atlas_core::{CodecError, EntityKind};
use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, Error as SqliteError, OpenFlags};
use thiserror::Error;

pub use cursor::DupCursor;
pub use schema::{IndexTable, LOCATIONS, METADATA, SCHEMA_VERSION, all_tables, payload_table};
pub use tables::{Index, Locations, Metadata, Payloads};

/// Metadata key holding the snapshot timestamp of the data.
pub const REPLICATION_TIMESTAMP: &str = "replication_timestamp";
/// Metadata key holding the last applied change-batch sequence marker.
pub const REPLICATION_SEQUENCE_NUMBER: &str = "replication_sequence_number";
/// Metadata key holding the file the store was bulk loaded from.
pub const IMPORT_FILENAME: &str = "import_filename";

const BUSY_TIMEOUT: Duration = Duration::from_secs(60);
const MMAP_SIZE: i64 = 1 << 30;

/// Errors raised by the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A store was created over an existing file.
    #[error("refusing to create store over existing file {path}")]
    AlreadyExists {
        /// Path supplied by the caller.
        path: Utf8PathBuf,
    },
    /// Opening a store that does not exist.
    #[error("store {path} does not exist")]
    Missing {
        /// Path supplied by the caller.
        path: Utf8PathBuf,
    },
    /// The parent directory of a new store could not be created.
    #[error("failed to prepare directory for {path}")]
    CreateDirectory {
        /// Store path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// SQLite failed to open the database file.
    #[error("failed to open store at {path}")]
    Open {
        /// Store path.
        path: Utf8PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// A connection pragma could not be applied.
    #[error("failed to configure connection pragma `{pragma}`")]
    Configure {
        /// Pragma name.
        pragma: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// A schema statement failed.
    #[error("failed to execute migration step '{step}'")]
    Migration {
        /// Description of the step.
        step: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// The file was written by an incompatible schema.
    #[error("expected store schema version {expected} but found {found}")]
    VersionMismatch {
        /// Version this build understands.
        expected: i64,
        /// Version recorded in the file.
        found: i64,
    },
    /// Beginning, committing or rolling back a transaction failed.
    #[error("failed to {action} transaction")]
    Transaction {
        /// `begin`, `commit` or `roll back`.
        action: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// A table read or write failed.
    #[error("query on table {table} failed")]
    Query {
        /// Table being accessed.
        table: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// An append was not strictly after the table's last entry.
    #[error("append to {table} out of order: ({key}, {value}) is not after ({last_key}, {last_value})")]
    AppendOrder {
        /// Table being appended to.
        table: &'static str,
        /// Rejected key.
        key: u64,
        /// Rejected value, or zero for single-valued tables.
        value: u64,
        /// Last stored key.
        last_key: u64,
        /// Last stored value, or zero for single-valued tables.
        last_value: u64,
    },
    /// A stored key did not have the fixed 8-byte width.
    #[error("corrupt key of {len} bytes in table {table}")]
    CorruptKey {
        /// Table holding the key.
        table: &'static str,
        /// Width found.
        len: usize,
    },
    /// A payload could not be encoded or decoded.
    #[error("invalid payload for {kind} {id}")]
    Payload {
        /// Kind of the entity.
        kind: EntityKind,
        /// Entity id.
        id: u64,
        /// Codec failure.
        #[source]
        source: CodecError,
    },
}

impl StoreError {
    pub(crate) fn query(table: &'static str) -> impl FnOnce(SqliteError) -> Self {
        move |source| Self::Query { table, source }
    }
}

/// Marker for tables opened through a [`ReadTxn`].
#[derive(Debug, Clone, Copy)]
pub struct ReadOnly;

/// Marker for tables opened through a [`WriteTxn`].
#[derive(Debug, Clone, Copy)]
pub struct ReadWrite;

mod sealed {
    pub trait Sealed {
        fn connection(&self) -> &rusqlite::Connection;
    }
}

/// Shared table access for read and write transactions.
///
/// Tables opened through a [`WriteTxn`] observe that transaction's own
/// uncommitted writes.
pub trait Txn: sealed::Sealed {
    /// Access marker carried by tables opened from this transaction.
    type Access;

    /// Packed point coordinates.
    fn locations(&self) -> Locations<'_, Self::Access> {
        Locations::new(self.connection())
    }

    /// Encoded payloads for `kind`.
    fn payloads(&self, kind: EntityKind) -> Payloads<'_, Self::Access> {
        Payloads::new(self.connection(), kind)
    }

    /// One of the five reference indices.
    fn index(&self, table: IndexTable) -> Index<'_, Self::Access> {
        Index::new(self.connection(), table)
    }

    /// String metadata records.
    fn metadata(&self) -> Metadata<'_, Self::Access> {
        Metadata::new(self.connection())
    }

    /// Number of rows in `table`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] when the count fails.
    fn count(&self, table: &'static str) -> Result<u64, StoreError> {
        let rows: i64 = self
            .connection()
            .query_row(&format!("SELECT count(*) FROM {table}"), [], |row| row.get(0))
            .map_err(StoreError::query(table))?;
        Ok(u64::try_from(rows).unwrap_or_default())
    }
}

/// Handle to a store file.
#[derive(Debug, Clone)]
pub struct Store {
    path: Utf8PathBuf,
}

impl Store {
    /// Create a new, empty store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if `path` already exists, or a
    /// SQLite error if the file cannot be initialised.
    pub fn create(path: &Utf8Path) -> Result<Self, StoreError> {
        if atlas_fs::file_is_file(path) {
            return Err(StoreError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        atlas_fs::ensure_parent_dir(path).map_err(|source| StoreError::CreateDirectory {
            path: path.to_path_buf(),
            source,
        })?;
        let mut connection = connect(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        connection
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|source| StoreError::Configure {
                pragma: "journal_mode",
                source,
            })?;
        initialise_schema(&mut connection)?;
        log::debug!("created store at {path}");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Open an existing store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] if the file does not exist and
    /// [`StoreError::VersionMismatch`] if it uses another schema version.
    pub fn open(path: &Utf8Path) -> Result<Self, StoreError> {
        if !atlas_fs::file_is_file(path) {
            return Err(StoreError::Missing {
                path: path.to_path_buf(),
            });
        }
        let mut connection = connect(path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
        initialise_schema(&mut connection)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Location of the store file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Begin the single write transaction, waiting for the write lock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the connection or lock cannot be acquired.
    pub fn write(&self) -> Result<WriteTxn, StoreError> {
        let connection = connect(&self.path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
        begin_immediate(&connection)?;
        Ok(WriteTxn {
            connection,
            open: true,
        })
    }

    /// Begin a read transaction pinned to the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the connection cannot be opened.
    pub fn read(&self) -> Result<ReadTxn, StoreError> {
        // Read-write flags let the reader attach to the WAL index; the view types
        // keep the transaction read only.
        let connection = connect(&self.path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
        connection
            .execute_batch("BEGIN DEFERRED")
            .map_err(|source| StoreError::Transaction {
                action: "begin",
                source,
            })?;
        // A deferred transaction takes its snapshot at the first read.
        connection
            .query_row("SELECT count(*) FROM metadata", [], |row| row.get::<_, i64>(0))
            .map_err(StoreError::query(METADATA))?;
        Ok(ReadTxn { connection })
    }
}

fn connect(path: &Utf8Path, flags: OpenFlags) -> Result<Connection, StoreError> {
    let connection =
        Connection::open_with_flags(path.as_std_path(), flags).map_err(|source| {
            StoreError::Open {
                path: path.to_path_buf(),
                source,
            }
        })?;
    connection
        .busy_timeout(BUSY_TIMEOUT)
        .map_err(|source| StoreError::Configure {
            pragma: "busy_timeout",
            source,
        })?;
    connection
        .pragma_update_and_check(None, "mmap_size", MMAP_SIZE, |row| row.get::<_, i64>(0))
        .map_err(|source| StoreError::Configure {
            pragma: "mmap_size",
            source,
        })?;
    Ok(connection)
}

fn initialise_schema(connection: &mut Connection) -> Result<(), StoreError> {
    let transaction = connection
        .transaction()
        .map_err(|source| StoreError::Migration {
            step: "begin schema transaction",
            source,
        })?;
    schema::initialise(&transaction)?;
    transaction
        .commit()
        .map_err(|source| StoreError::Migration {
            step: "commit schema transaction",
            source,
        })
}

fn begin_immediate(connection: &Connection) -> Result<(), StoreError> {
    connection
        .execute_batch("BEGIN IMMEDIATE")
        .map_err(|source| StoreError::Transaction {
            action: "begin",
            source,
        })
}

/// The store's single write transaction.
///
/// Dropping the guard without calling [`WriteTxn::commit`] rolls back every
/// write made through it.
#[derive(Debug)]
pub struct WriteTxn {
    connection: Connection,
    open: bool,
}

impl WriteTxn {
    /// Make every write durable and release the write lock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transaction`] if SQLite rejects the commit; the
    /// transaction is rolled back when the guard drops.
    pub fn commit(mut self) -> Result<(), StoreError> {
        self.end("COMMIT", "commit")
    }

    /// Discard every write and release the write lock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transaction`] if the rollback fails.
    pub fn abort(mut self) -> Result<(), StoreError> {
        self.end("ROLLBACK", "roll back")
    }

    /// Commit the writes so far and immediately begin a new transaction.
    ///
    /// Used by bulk loads to bound the size of a single transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transaction`] labelled `commit` or `begin` for
    /// the step that failed. After a failed `begin` the guard no longer holds
    /// a transaction and further writes must not be attempted.
    pub fn checkpoint(&mut self) -> Result<(), StoreError> {
        self.end("COMMIT", "commit")?;
        begin_immediate(&self.connection)?;
        self.open = true;
        Ok(())
    }

    fn end(&mut self, sql: &str, action: &'static str) -> Result<(), StoreError> {
        self.connection
            .execute_batch(sql)
            .map_err(|source| StoreError::Transaction { action, source })?;
        self.open = false;
        Ok(())
    }
}

impl Drop for WriteTxn {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.connection.execute_batch("ROLLBACK") {
                log::warn!("failed to roll back abandoned write transaction: {err}");
            }
        }
    }
}

impl sealed::Sealed for WriteTxn {
    fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl Txn for WriteTxn {
    type Access = ReadWrite;
}

/// A read-only snapshot of the store.
#[derive(Debug)]
pub struct ReadTxn {
    connection: Connection,
}

impl Drop for ReadTxn {
    fn drop(&mut self) {
        if let Err(err) = self.connection.execute_batch("COMMIT") {
            log::warn!("failed to release read transaction: {err}");
        }
    }
}

impl sealed::Sealed for ReadTxn {
    fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl Txn for ReadTxn {
    type Access = ReadOnly;
}
