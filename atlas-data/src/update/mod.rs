//! Incremental application of change records.
//!
//! Each change reads the entity's previous state before writing, so the
//! derived indices are updated by difference: references present before and
//! after a change are never touched. A whole batch runs in one write
//! transaction and is either committed with its sequence marker or rolled
//! back.

use std::collections::BTreeSet;

use log::{debug, info};
use thiserror::Error;

use atlas_core::{CellId, Change, Collection, Entity, EntityKind, Point, Sequence};

use crate::store::{
    IndexTable, REPLICATION_SEQUENCE_NUMBER, REPLICATION_TIMESTAMP, Store, StoreError, Txn,
    WriteTxn,
};

/// Errors raised while applying changes.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// A store read or write failed; the batch must be aborted.
    #[error("failed to apply change to {kind} {id}")]
    Apply {
        /// Kind of the entity being changed.
        kind: EntityKind,
        /// Id of the entity being changed.
        id: u64,
        /// Store failure.
        #[source]
        source: StoreError,
    },
    /// Opening, finishing or annotating the batch transaction failed.
    #[error("failed to {action} update batch")]
    Batch {
        /// Step that failed.
        action: &'static str,
        /// Store failure.
        #[source]
        source: StoreError,
    },
}

/// Writes issued while applying changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Change records applied.
    pub changes: u64,
    /// Index pairs inserted.
    pub index_inserts: u64,
    /// Index pairs deleted.
    pub index_deletes: u64,
    /// Payload or coordinate records written.
    pub payload_writes: u64,
    /// Payload or coordinate records deleted.
    pub payload_deletes: u64,
}

impl UpdateReport {
    /// Total index writes, inserts and deletes combined.
    #[must_use]
    pub const fn index_writes(&self) -> u64 {
        self.index_inserts + self.index_deletes
    }
}

/// Applies change records inside a caller-owned write transaction.
#[derive(Debug)]
pub struct Updater<'t> {
    txn: &'t WriteTxn,
    report: UpdateReport,
}

impl<'t> Updater<'t> {
    /// Apply changes through `txn`.
    #[must_use]
    pub const fn new(txn: &'t WriteTxn) -> Self {
        Self {
            txn,
            report: UpdateReport {
                changes: 0,
                index_inserts: 0,
                index_deletes: 0,
                payload_writes: 0,
                payload_deletes: 0,
            },
        }
    }

    /// Writes issued so far.
    #[must_use]
    pub const fn report(&self) -> UpdateReport {
        self.report
    }

    /// Apply one change.
    ///
    /// Creates and modifies both replace the stored entity; deleting an
    /// absent entity is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Apply`] when a store operation fails.
    pub fn apply(&mut self, change: &Change) -> Result<(), UpdateError> {
        let (kind, id) = (change.kind(), change.id());
        let result = match change {
            Change::Create(entity) | Change::Modify(entity) => match entity {
                Entity::Point(point) => self.point(point.id, Some(point)),
                Entity::Sequence(sequence) => self.sequence(sequence.id, Some(sequence)),
                Entity::Collection(collection) => self.collection(collection.id, Some(collection)),
            },
            Change::Delete { .. } => match kind {
                EntityKind::Point => self.point(id, None),
                EntityKind::Sequence => self.sequence(id, None),
                EntityKind::Collection => self.collection(id, None),
            },
        };
        result.map_err(|source| UpdateError::Apply { kind, id, source })?;
        self.report.changes += 1;
        Ok(())
    }

    fn point(&mut self, id: u64, current: Option<&Point>) -> Result<(), StoreError> {
        let locations = self.txn.locations();
        let payloads = self.txn.payloads(EntityKind::Point);
        let cells = self.txn.index(IndexTable::CellPoint);
        let prior_cell = locations.get(id)?.map(CellId::leaf);

        let Some(point) = current else {
            if payloads.delete(id)? {
                self.report.payload_deletes += 1;
            }
            if locations.delete(id)? {
                self.report.payload_deletes += 1;
            }
            if let Some(cell) = prior_cell {
                cells.delete_dup(cell.raw(), id)?;
                self.report.index_deletes += 1;
            }
            return Ok(());
        };

        locations.put(id, point.location)?;
        self.report.payload_writes += 1;
        if point.is_tagged() {
            payloads.put(id, &point.body())?;
            self.report.payload_writes += 1;
        } else if payloads.delete(id)? {
            self.report.payload_deletes += 1;
        }

        let cell = CellId::leaf(point.location);
        match prior_cell {
            Some(prior) if prior == cell => {}
            Some(prior) => {
                cells.delete_dup(prior.raw(), id)?;
                self.report.index_deletes += 1;
                cells.put_dup(cell.raw(), id)?;
                self.report.index_inserts += 1;
            }
            None => {
                cells.put_dup(cell.raw(), id)?;
                self.report.index_inserts += 1;
            }
        }
        Ok(())
    }

    fn sequence(&mut self, id: u64, current: Option<&Sequence>) -> Result<(), StoreError> {
        let payloads = self.txn.payloads(EntityKind::Sequence);
        let prior: BTreeSet<(EntityKind, u64)> = payloads
            .get::<Sequence>(id)?
            .map(|sequence| {
                sequence
                    .members
                    .into_iter()
                    .map(|member| (EntityKind::Point, member))
                    .collect()
            })
            .unwrap_or_default();

        let next = match current {
            Some(sequence) => {
                payloads.put(id, sequence)?;
                self.report.payload_writes += 1;
                sequence
                    .members
                    .iter()
                    .map(|member| (EntityKind::Point, *member))
                    .collect()
            }
            None => {
                if payloads.delete(id)? {
                    self.report.payload_deletes += 1;
                }
                BTreeSet::new()
            }
        };
        self.apply_diff(id, &prior, &next, |_| IndexTable::PointSequence)
    }

    fn collection(&mut self, id: u64, current: Option<&Collection>) -> Result<(), StoreError> {
        let payloads = self.txn.payloads(EntityKind::Collection);
        let prior = payloads
            .get::<Collection>(id)?
            .map(|collection| member_set(&collection))
            .unwrap_or_default();

        let next = match current {
            Some(collection) => {
                payloads.put(id, collection)?;
                self.report.payload_writes += 1;
                member_set(collection)
            }
            None => {
                if payloads.delete(id)? {
                    self.report.payload_deletes += 1;
                }
                BTreeSet::new()
            }
        };
        self.apply_diff(id, &prior, &next, IndexTable::for_collection_member)
    }

    /// Delete references only in `prior` and insert references only in
    /// `next`, each into the index chosen by `table` for its kind.
    fn apply_diff(
        &mut self,
        id: u64,
        prior: &BTreeSet<(EntityKind, u64)>,
        next: &BTreeSet<(EntityKind, u64)>,
        table: impl Fn(EntityKind) -> IndexTable,
    ) -> Result<(), StoreError> {
        for (kind, member) in prior.difference(next) {
            self.txn.index(table(*kind)).delete_dup(*member, id)?;
            self.report.index_deletes += 1;
        }
        for (kind, member) in next.difference(prior) {
            self.txn.index(table(*kind)).put_dup(*member, id)?;
            self.report.index_inserts += 1;
        }
        Ok(())
    }
}

fn member_set(collection: &Collection) -> BTreeSet<(EntityKind, u64)> {
    collection
        .members
        .iter()
        .map(|member| (member.kind(), member.id()))
        .collect()
}

/// Replication position a batch moves the store to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchMarker {
    /// Sequence number of the applied change file.
    pub sequence_number: String,
    /// Timestamp of the applied change file.
    pub timestamp: String,
}

/// How a batch transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    /// Make the batch durable and advance the replication metadata.
    Commit,
    /// Roll back every write of the batch.
    Abort,
}

/// Result of [`apply_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Sequence number stored before the batch, if any.
    pub previous_sequence_number: Option<String>,
    /// Writes issued by the batch.
    pub report: UpdateReport,
    /// Whether the batch was committed.
    pub committed: bool,
}

/// Apply `changes` in a single write transaction.
///
/// With [`Finish::Commit`] the replication sequence number and timestamp are
/// updated together with the data. With [`Finish::Abort`], or when any
/// change fails, the store is left as it was.
///
/// # Errors
///
/// Returns [`UpdateError`] when a change or the transaction fails; nothing
/// is committed in that case.
pub fn apply_batch<'c, I>(
    store: &Store,
    changes: I,
    marker: &BatchMarker,
    finish: Finish,
) -> Result<BatchOutcome, UpdateError>
where
    I: IntoIterator<Item = &'c Change>,
{
    let batch = |action: &'static str| move |source| UpdateError::Batch { action, source };
    let txn = store.write().map_err(batch("begin"))?;
    let previous_sequence_number = txn
        .metadata()
        .get(REPLICATION_SEQUENCE_NUMBER)
        .map_err(batch("read metadata for"))?;
    debug!(
        "applying batch {} over {}",
        marker.sequence_number,
        previous_sequence_number.as_deref().unwrap_or("UNKNOWN")
    );

    let mut updater = Updater::new(&txn);
    for change in changes {
        updater.apply(change)?;
    }
    let report = updater.report();

    let committed = match finish {
        Finish::Commit => {
            let metadata = txn.metadata();
            metadata
                .put(REPLICATION_SEQUENCE_NUMBER, &marker.sequence_number)
                .map_err(batch("annotate"))?;
            metadata
                .put(REPLICATION_TIMESTAMP, &marker.timestamp)
                .map_err(batch("annotate"))?;
            txn.commit().map_err(batch("commit"))?;
            true
        }
        Finish::Abort => {
            txn.abort().map_err(batch("abort"))?;
            false
        }
    };
    info!(
        "{} {} changes ({} index inserts, {} index deletes)",
        if committed { "committed" } else { "aborted" },
        report.changes,
        report.index_inserts,
        report.index_deletes
    );
    Ok(BatchOutcome {
        previous_sequence_number,
        report,
        committed,
    })
}
