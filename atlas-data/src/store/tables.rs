//! Typed views over the store's tables.
//!
//! Views borrow the transaction's connection. Read methods are available on
//! every view; mutating methods exist only when the view was opened through
//! a write transaction.

use std::marker::PhantomData;

use atlas_core::{EntityKind, Location, decode_payload, encode_payload};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Serialize, de::DeserializeOwned};

use super::cursor::DupCursor;
use super::schema::{IndexTable, LOCATIONS, METADATA, payload_table};
use super::{ReadWrite, StoreError, keys};

/// Point id to packed coordinate.
#[derive(Debug, Clone, Copy)]
pub struct Locations<'t, A> {
    connection: &'t Connection,
    access: PhantomData<A>,
}

impl<'t, A> Locations<'t, A> {
    pub(crate) const fn new(connection: &'t Connection) -> Self {
        Self {
            connection,
            access: PhantomData,
        }
    }

    /// Stored coordinate of point `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on SQLite failure.
    pub fn get(&self, id: u64) -> Result<Option<Location>, StoreError> {
        let packed: Option<i64> = self
            .connection
            .prepare_cached("SELECT coord FROM locations WHERE id = ?1")
            .and_then(|mut statement| {
                statement
                    .query_row([keys::encode(id)], |row| row.get(0))
                    .optional()
            })
            .map_err(StoreError::query(LOCATIONS))?;
        Ok(packed.map(|value| Location::from_packed(value.cast_unsigned())))
    }

    /// Whether point `id` has a coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on SQLite failure.
    pub fn exists(&self, id: u64) -> Result<bool, StoreError> {
        Ok(self.get(id)?.is_some())
    }
}

impl Locations<'_, ReadWrite> {
    /// Insert or replace the coordinate of point `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on SQLite failure.
    pub fn put(&self, id: u64, location: Location) -> Result<(), StoreError> {
        self.connection
            .prepare_cached("INSERT OR REPLACE INTO locations (id, coord) VALUES (?1, ?2)")
            .and_then(|mut statement| {
                statement.execute(params![
                    keys::encode(id),
                    location.to_packed().cast_signed()
                ])
            })
            .map(|_| ())
            .map_err(StoreError::query(LOCATIONS))
    }

    /// Insert a coordinate whose id must exceed every stored id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AppendOrder`] when `id` is not after the last
    /// stored id.
    pub fn append(&self, id: u64, location: Location) -> Result<(), StoreError> {
        if let Some(last) = last_key(self.connection, LOCATIONS, "id")? {
            if id <= last {
                return Err(StoreError::AppendOrder {
                    table: LOCATIONS,
                    key: id,
                    value: 0,
                    last_key: last,
                    last_value: 0,
                });
            }
        }
        self.put(id, location)
    }

    /// Remove the coordinate of point `id`, reporting whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on SQLite failure.
    pub fn delete(&self, id: u64) -> Result<bool, StoreError> {
        delete_key(self.connection, LOCATIONS, "DELETE FROM locations WHERE id = ?1", id)
    }
}

/// Entity id to encoded payload, one table per [`EntityKind`].
#[derive(Debug, Clone, Copy)]
pub struct Payloads<'t, A> {
    connection: &'t Connection,
    kind: EntityKind,
    access: PhantomData<A>,
}

impl<'t, A> Payloads<'t, A> {
    pub(crate) const fn new(connection: &'t Connection, kind: EntityKind) -> Self {
        Self {
            connection,
            kind,
            access: PhantomData,
        }
    }

    fn table(&self) -> &'static str {
        payload_table(self.kind)
    }

    /// Raw encoded payload of entity `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on SQLite failure.
    pub fn get_raw(&self, id: u64) -> Result<Option<Vec<u8>>, StoreError> {
        let table = self.table();
        self.connection
            .prepare_cached(&format!("SELECT body FROM {table} WHERE id = ?1"))
            .and_then(|mut statement| {
                statement
                    .query_row([keys::encode(id)], |row| row.get(0))
                    .optional()
            })
            .map_err(StoreError::query(table))
    }

    /// Decoded payload of entity `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Payload`] when the stored bytes cannot be
    /// decoded as `T`.
    pub fn get<T: DeserializeOwned>(&self, id: u64) -> Result<Option<T>, StoreError> {
        self.get_raw(id)?
            .map(|bytes| {
                decode_payload(&bytes).map_err(|source| StoreError::Payload {
                    kind: self.kind,
                    id,
                    source,
                })
            })
            .transpose()
    }

    /// Whether entity `id` has a payload.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on SQLite failure.
    pub fn exists(&self, id: u64) -> Result<bool, StoreError> {
        let table = self.table();
        self.connection
            .prepare_cached(&format!("SELECT 1 FROM {table} WHERE id = ?1"))
            .and_then(|mut statement| statement.exists([keys::encode(id)]))
            .map_err(StoreError::query(table))
    }
}

impl Payloads<'_, ReadWrite> {
    fn encode<T: Serialize>(&self, id: u64, value: &T) -> Result<Vec<u8>, StoreError> {
        encode_payload(value).map_err(|source| StoreError::Payload {
            kind: self.kind,
            id,
            source,
        })
    }

    /// Insert or replace the payload of entity `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on encoding or SQLite failure.
    pub fn put<T: Serialize>(&self, id: u64, value: &T) -> Result<(), StoreError> {
        let body = self.encode(id, value)?;
        let table = self.table();
        self.connection
            .prepare_cached(&format!(
                "INSERT OR REPLACE INTO {table} (id, body) VALUES (?1, ?2)"
            ))
            .and_then(|mut statement| statement.execute(params![keys::encode(id), body]))
            .map(|_| ())
            .map_err(StoreError::query(table))
    }

    /// Insert a payload whose id must exceed every stored id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AppendOrder`] when `id` is not after the last
    /// stored id.
    pub fn append<T: Serialize>(&self, id: u64, value: &T) -> Result<(), StoreError> {
        let table = self.table();
        if let Some(last) = last_key(self.connection, table, "id")? {
            if id <= last {
                return Err(StoreError::AppendOrder {
                    table,
                    key: id,
                    value: 0,
                    last_key: last,
                    last_value: 0,
                });
            }
        }
        self.put(id, value)
    }

    /// Remove the payload of entity `id`, reporting whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on SQLite failure.
    pub fn delete(&self, id: u64) -> Result<bool, StoreError> {
        let table = self.table();
        delete_key(
            self.connection,
            table,
            &format!("DELETE FROM {table} WHERE id = ?1"),
            id,
        )
    }
}

/// Multi-valued reference index: each key maps to a sorted set of values.
#[derive(Debug, Clone, Copy)]
pub struct Index<'t, A> {
    connection: &'t Connection,
    table: IndexTable,
    access: PhantomData<A>,
}

impl<'t, A> Index<'t, A> {
    pub(crate) const fn new(connection: &'t Connection, table: IndexTable) -> Self {
        Self {
            connection,
            table,
            access: PhantomData,
        }
    }

    /// Which index this view reads.
    #[must_use]
    pub const fn table(&self) -> IndexTable {
        self.table
    }

    /// Every value stored under `key`, ascending, in one call.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on SQLite failure or corrupt values.
    pub fn get_all(&self, key: u64) -> Result<Vec<u64>, StoreError> {
        values_for_key(self.connection, self.table, key)
    }

    /// Whether any value is stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on SQLite failure.
    pub fn exists(&self, key: u64) -> Result<bool, StoreError> {
        let name = self.table.name();
        self.connection
            .prepare_cached(&format!("SELECT 1 FROM {name} WHERE key = ?1 LIMIT 1"))
            .and_then(|mut statement| statement.exists([keys::encode(key)]))
            .map_err(StoreError::query(name))
    }

    /// Whether the pair `(key, value)` is stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on SQLite failure.
    pub fn contains(&self, key: u64, value: u64) -> Result<bool, StoreError> {
        let name = self.table.name();
        self.connection
            .prepare_cached(&format!(
                "SELECT 1 FROM {name} WHERE key = ?1 AND value = ?2"
            ))
            .and_then(|mut statement| {
                statement.exists(params![keys::encode(key), keys::encode(value)])
            })
            .map_err(StoreError::query(name))
    }

    /// Cursor over `(key, values)` groups in key order.
    #[must_use]
    pub fn cursor(&self) -> DupCursor<'t> {
        DupCursor::new(self.connection, self.table)
    }
}

impl Index<'_, ReadWrite> {
    /// Add the pair `(key, value)`, reporting whether it was new.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on SQLite failure.
    pub fn put_dup(&self, key: u64, value: u64) -> Result<bool, StoreError> {
        let name = self.table.name();
        self.connection
            .prepare_cached(&format!(
                "INSERT OR IGNORE INTO {name} (key, value) VALUES (?1, ?2)"
            ))
            .and_then(|mut statement| {
                statement.execute(params![keys::encode(key), keys::encode(value)])
            })
            .map(|changed| changed > 0)
            .map_err(StoreError::query(name))
    }

    /// Remove the pair `(key, value)`, reporting whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on SQLite failure.
    pub fn delete_dup(&self, key: u64, value: u64) -> Result<bool, StoreError> {
        let name = self.table.name();
        self.connection
            .prepare_cached(&format!("DELETE FROM {name} WHERE key = ?1 AND value = ?2"))
            .and_then(|mut statement| {
                statement.execute(params![keys::encode(key), keys::encode(value)])
            })
            .map(|changed| changed > 0)
            .map_err(StoreError::query(name))
    }

    /// Remove every value stored under `key`, returning how many existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on SQLite failure.
    pub fn delete(&self, key: u64) -> Result<usize, StoreError> {
        let name = self.table.name();
        self.connection
            .prepare_cached(&format!("DELETE FROM {name} WHERE key = ?1"))
            .and_then(|mut statement| statement.execute([keys::encode(key)]))
            .map_err(StoreError::query(name))
    }

    /// Append the first value of a new key; `key` must exceed every stored
    /// key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AppendOrder`] when the ordering is violated.
    pub fn append(&self, key: u64, value: u64) -> Result<(), StoreError> {
        if let Some((last_key, last_value)) = self.last_pair()? {
            if key <= last_key {
                return Err(self.order_error(key, value, last_key, last_value));
            }
        }
        self.insert(key, value)
    }

    /// Append another value for the last stored key; `value` must exceed
    /// every value already stored under it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AppendOrder`] when `key` is not the last stored
    /// key or `value` is not after its last value.
    pub fn append_dup(&self, key: u64, value: u64) -> Result<(), StoreError> {
        match self.last_pair()? {
            Some((last_key, last_value)) if key == last_key && value > last_value => {
                self.insert(key, value)
            }
            Some((last_key, last_value)) => {
                Err(self.order_error(key, value, last_key, last_value))
            }
            None => Err(self.order_error(key, value, 0, 0)),
        }
    }

    const fn order_error(&self, key: u64, value: u64, last_key: u64, last_value: u64) -> StoreError {
        StoreError::AppendOrder {
            table: self.table.name(),
            key,
            value,
            last_key,
            last_value,
        }
    }

    fn insert(&self, key: u64, value: u64) -> Result<(), StoreError> {
        let name = self.table.name();
        self.connection
            .prepare_cached(&format!("INSERT INTO {name} (key, value) VALUES (?1, ?2)"))
            .and_then(|mut statement| {
                statement.execute(params![keys::encode(key), keys::encode(value)])
            })
            .map(|_| ())
            .map_err(StoreError::query(name))
    }

    fn last_pair(&self) -> Result<Option<(u64, u64)>, StoreError> {
        let name = self.table.name();
        let row: Option<(Vec<u8>, Vec<u8>)> = self
            .connection
            .prepare_cached(&format!(
                "SELECT key, value FROM {name} ORDER BY key DESC, value DESC LIMIT 1"
            ))
            .and_then(|mut statement| {
                statement
                    .query_row([], |row| Ok((row.get(0)?, row.get(1)?)))
                    .optional()
            })
            .map_err(StoreError::query(name))?;
        row.map(|(key, value)| Ok((keys::decode(name, &key)?, keys::decode(name, &value)?)))
            .transpose()
    }
}

/// String key to string value records.
#[derive(Debug, Clone, Copy)]
pub struct Metadata<'t, A> {
    connection: &'t Connection,
    access: PhantomData<A>,
}

impl<'t, A> Metadata<'t, A> {
    pub(crate) const fn new(connection: &'t Connection) -> Self {
        Self {
            connection,
            access: PhantomData,
        }
    }

    /// Value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on SQLite failure.
    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.connection
            .prepare_cached("SELECT value FROM metadata WHERE key = ?1")
            .and_then(|mut statement| statement.query_row([key], |row| row.get(0)).optional())
            .map_err(StoreError::query(METADATA))
    }
}

impl Metadata<'_, ReadWrite> {
    /// Insert or replace the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] on SQLite failure.
    pub fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.connection
            .prepare_cached("INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)")
            .and_then(|mut statement| statement.execute([key, value]))
            .map(|_| ())
            .map_err(StoreError::query(METADATA))
    }
}

pub(crate) fn values_for_key(
    connection: &Connection,
    table: IndexTable,
    key: u64,
) -> Result<Vec<u64>, StoreError> {
    let name = table.name();
    let mut statement = connection
        .prepare_cached(&format!(
            "SELECT value FROM {name} WHERE key = ?1 ORDER BY value"
        ))
        .map_err(StoreError::query(name))?;
    let rows = statement
        .query_map([keys::encode(key)], |row| row.get::<_, Vec<u8>>(0))
        .map_err(StoreError::query(name))?;
    rows.map(|bytes| keys::decode(name, &bytes.map_err(StoreError::query(name))?))
        .collect()
}

fn last_key(
    connection: &Connection,
    table: &'static str,
    column: &str,
) -> Result<Option<u64>, StoreError> {
    let key: Option<Vec<u8>> = connection
        .prepare_cached(&format!(
            "SELECT {column} FROM {table} ORDER BY {column} DESC LIMIT 1"
        ))
        .and_then(|mut statement| statement.query_row([], |row| row.get(0)).optional())
        .map_err(StoreError::query(table))?;
    key.map(|bytes| keys::decode(table, &bytes)).transpose()
}

fn delete_key(
    connection: &Connection,
    table: &'static str,
    sql: &str,
    id: u64,
) -> Result<bool, StoreError> {
    connection
        .prepare_cached(sql)
        .and_then(|mut statement| statement.execute([keys::encode(id)]))
        .map(|changed| changed > 0)
        .map_err(StoreError::query(table))
}
