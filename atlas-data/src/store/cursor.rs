//! Grouped cursor over a multi-valued index.

use rusqlite::{Connection, OptionalExtension, params};

use super::schema::IndexTable;
use super::tables::values_for_key;
use super::{StoreError, keys};

#[derive(Debug)]
enum Position {
    Unpositioned,
    At {
        key: u64,
        values: Vec<u64>,
        offset: usize,
    },
    Exhausted,
}

/// Cursor over an index, positioned on one key and one of its values.
///
/// As an [`Iterator`], the cursor yields every `(key, values)` group from
/// its current position onwards.
#[derive(Debug)]
pub struct DupCursor<'t> {
    connection: &'t Connection,
    table: IndexTable,
    position: Position,
    yielded: bool,
}

impl<'t> DupCursor<'t> {
    pub(crate) const fn new(connection: &'t Connection, table: IndexTable) -> Self {
        Self {
            connection,
            table,
            position: Position::Unpositioned,
            yielded: false,
        }
    }

    /// Move to the first key greater than or equal to `key`.
    ///
    /// Returns the key the cursor landed on, or `None` past the end.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on SQLite failure.
    pub fn seek_range(&mut self, key: u64) -> Result<Option<u64>, StoreError> {
        let found = self.first_key("key >= ?1", key)?;
        self.land(found)
    }

    /// Move to the first value of the next distinct key.
    ///
    /// An unpositioned cursor moves to the first key of the index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on SQLite failure.
    pub fn next_no_duplicate(&mut self) -> Result<Option<u64>, StoreError> {
        let found = match &self.position {
            Position::Unpositioned => self.first_key("key >= ?1", 0)?,
            Position::At { key, .. } => self.first_key("key > ?1", *key)?,
            Position::Exhausted => None,
        };
        self.land(found)
    }

    /// Advance to the next value under the current key.
    ///
    /// Returns `None` and stays on the last value once the key's values are
    /// used up.
    pub fn next_duplicate(&mut self) -> Option<u64> {
        match &mut self.position {
            Position::At { values, offset, .. } => {
                let next = values.get(*offset + 1).copied()?;
                *offset += 1;
                Some(next)
            }
            Position::Unpositioned | Position::Exhausted => None,
        }
    }

    /// Key under the cursor.
    #[must_use]
    pub const fn key(&self) -> Option<u64> {
        match &self.position {
            Position::At { key, .. } => Some(*key),
            Position::Unpositioned | Position::Exhausted => None,
        }
    }

    /// Value under the cursor.
    #[must_use]
    pub fn value(&self) -> Option<u64> {
        match &self.position {
            Position::At { values, offset, .. } => values.get(*offset).copied(),
            Position::Unpositioned | Position::Exhausted => None,
        }
    }

    /// Every value stored under the current key.
    #[must_use]
    pub fn values(&self) -> &[u64] {
        match &self.position {
            Position::At { values, .. } => values,
            Position::Unpositioned | Position::Exhausted => &[],
        }
    }

    /// Every `(key, value)` pair with `begin <= key < end`, in order.
    ///
    /// Does not move the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on SQLite failure or corrupt keys.
    pub fn scan_range(&self, begin: u64, end: u64) -> Result<Vec<(u64, u64)>, StoreError> {
        let name = self.table.name();
        let mut statement = self
            .connection
            .prepare_cached(&format!(
                "SELECT key, value FROM {name} WHERE key >= ?1 AND key < ?2 ORDER BY key, value"
            ))
            .map_err(StoreError::query(name))?;
        let rows = statement
            .query_map(params![keys::encode(begin), keys::encode(end)], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(StoreError::query(name))?;
        rows.map(|row| {
            let (key, value) = row.map_err(StoreError::query(name))?;
            Ok((keys::decode(name, &key)?, keys::decode(name, &value)?))
        })
        .collect()
    }

    fn first_key(&self, condition: &str, key: u64) -> Result<Option<u64>, StoreError> {
        let name = self.table.name();
        let found: Option<Vec<u8>> = self
            .connection
            .prepare_cached(&format!(
                "SELECT key FROM {name} WHERE {condition} ORDER BY key LIMIT 1"
            ))
            .and_then(|mut statement| {
                statement
                    .query_row([keys::encode(key)], |row| row.get(0))
                    .optional()
            })
            .map_err(StoreError::query(name))?;
        found.map(|bytes| keys::decode(name, &bytes)).transpose()
    }

    fn land(&mut self, found: Option<u64>) -> Result<Option<u64>, StoreError> {
        self.yielded = false;
        self.position = match found {
            Some(key) => Position::At {
                key,
                values: values_for_key(self.connection, self.table, key)?,
                offset: 0,
            },
            None => Position::Exhausted,
        };
        Ok(found)
    }
}

impl Iterator for DupCursor<'_> {
    type Item = Result<(u64, Vec<u64>), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let positioned = matches!(self.position, Position::At { .. });
        if !positioned || self.yielded {
            match self.next_no_duplicate() {
                Ok(Some(_)) => {}
                Ok(None) => return None,
                Err(err) => {
                    self.position = Position::Exhausted;
                    return Some(Err(err));
                }
            }
        }
        self.yielded = true;
        let key = self.key()?;
        Some(Ok((key, self.values().to_vec())))
    }
}
