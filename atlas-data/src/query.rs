//! Point lookups against a store snapshot.
//!
//! Absence is an ordinary result: every lookup returns `Option`.

use atlas_core::{Collection, EntityKind, Point, PointBody, Sequence};

use crate::store::{
    IndexTable, REPLICATION_SEQUENCE_NUMBER, REPLICATION_TIMESTAMP, StoreError, Txn, all_tables,
};

/// Row counts for every table, in schema order.
///
/// # Errors
///
/// Returns [`StoreError`] when a count fails.
pub fn stats<T: Txn>(txn: &T) -> Result<Vec<(&'static str, u64)>, StoreError> {
    all_tables()
        .into_iter()
        .map(|table| Ok((table, txn.count(table)?)))
        .collect()
}

/// Point `id` with its tags and revision, if it has a coordinate.
///
/// # Errors
///
/// Returns [`StoreError`] on read or decode failure.
pub fn point<T: Txn>(txn: &T, id: u64) -> Result<Option<Point>, StoreError> {
    let Some(location) = txn.locations().get(id)? else {
        return Ok(None);
    };
    let body: PointBody = txn.payloads(EntityKind::Point).get(id)?.unwrap_or_default();
    Ok(Some(Point {
        id,
        location,
        tags: body.tags,
        revision: body.revision,
    }))
}

/// Sequence `id`, if stored.
///
/// # Errors
///
/// Returns [`StoreError`] on read or decode failure.
pub fn sequence<T: Txn>(txn: &T, id: u64) -> Result<Option<Sequence>, StoreError> {
    txn.payloads(EntityKind::Sequence).get(id)
}

/// Collection `id`, if stored.
///
/// # Errors
///
/// Returns [`StoreError`] on read or decode failure.
pub fn collection<T: Txn>(txn: &T, id: u64) -> Result<Option<Collection>, StoreError> {
    txn.payloads(EntityKind::Collection).get(id)
}

/// Sequences and collections that list entity `id` of `kind` as a member.
///
/// # Errors
///
/// Returns [`StoreError`] on read failure.
pub fn referrers<T: Txn>(
    txn: &T,
    kind: EntityKind,
    id: u64,
) -> Result<Vec<(EntityKind, u64)>, StoreError> {
    let mut found = Vec::new();
    if kind == EntityKind::Point {
        found.extend(
            txn.index(IndexTable::PointSequence)
                .get_all(id)?
                .into_iter()
                .map(|sequence| (EntityKind::Sequence, sequence)),
        );
    }
    found.extend(
        txn.index(IndexTable::for_collection_member(kind))
            .get_all(id)?
            .into_iter()
            .map(|collection| (EntityKind::Collection, collection)),
    );
    Ok(found)
}

/// Snapshot timestamp recorded by the last load or update.
///
/// # Errors
///
/// Returns [`StoreError`] on read failure.
pub fn timestamp<T: Txn>(txn: &T) -> Result<Option<String>, StoreError> {
    txn.metadata().get(REPLICATION_TIMESTAMP)
}

/// Replication sequence number recorded by the last load or update.
///
/// # Errors
///
/// Returns [`StoreError`] on read failure.
pub fn sequence_number<T: Txn>(txn: &T) -> Result<Option<String>, StoreError> {
    txn.metadata().get(REPLICATION_SEQUENCE_NUMBER)
}
