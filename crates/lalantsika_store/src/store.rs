//! Record store trait definition.

use crate::error::StoreResult;
use chrono::{DateTime, Utc};
use lalantsika_model::{Entity, Record, RecordId};

/// Typed CRUD access to one table of the relational store.
///
/// # Invariants
///
/// - `create` and `update` leave the row with `synchronized = false`
/// - only `mark_synchronized*` sets `synchronized = true`
/// - `delete` and `mark_synchronized*` are no-ops for absent ids
/// - `find_unsynchronized` returns rows in insertion order
///
/// # Implementors
///
/// - [`crate::MemoryStore`] - For testing
/// - [`crate::JsonFileStore`] - For persistent storage
pub trait RecordStore<E: Entity>: Send + Sync {
    /// Inserts a new row with `synchronized = false`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::Validation`] on a constraint violation
    /// (including uniqueness).
    fn create(&self, fields: E) -> StoreResult<Record<E>>;

    /// Reads a row.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store itself fails.
    fn get(&self, id: RecordId) -> StoreResult<Option<Record<E>>>;

    /// Replaces the fields of a row and forces `synchronized = false`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::NotFound`] if `id` is absent and
    /// [`crate::StoreError::Validation`] on a constraint violation.
    fn update(&self, id: RecordId, fields: E) -> StoreResult<Record<E>>;

    /// Removes a row. Deleting an absent id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store itself fails.
    fn delete(&self, id: RecordId) -> StoreResult<()>;

    /// Returns every row with `synchronized = false`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store itself fails.
    fn find_unsynchronized(&self) -> StoreResult<Vec<Record<E>>>;

    /// Sets `synchronized = true` and `last_sync_at = at`.
    ///
    /// No-op if the row no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store itself fails.
    fn mark_synchronized(&self, id: RecordId, at: DateTime<Utc>) -> StoreResult<()>;

    /// Marks the row synchronized only if it is still at `revision`.
    ///
    /// Returns `false` when the row was mutated (or deleted) after the
    /// snapshot that was written to the mirror; it then stays dirty.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store itself fails.
    fn mark_synchronized_at(
        &self,
        id: RecordId,
        revision: u64,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Returns every row matching `predicate`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store itself fails.
    fn find_where(&self, predicate: &dyn Fn(&Record<E>) -> bool) -> StoreResult<Vec<Record<E>>>;

    /// Returns every row.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store itself fails.
    fn all(&self) -> StoreResult<Vec<Record<E>>> {
        self.find_where(&|_| true)
    }

    /// Number of rows with `synchronized = false`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the store itself fails.
    fn count_unsynchronized(&self) -> StoreResult<usize> {
        Ok(self.find_unsynchronized()?.len())
    }
}

impl<E: Entity, S: RecordStore<E> + ?Sized> RecordStore<E> for std::sync::Arc<S> {
    fn create(&self, fields: E) -> StoreResult<Record<E>> {
        (**self).create(fields)
    }

    fn get(&self, id: RecordId) -> StoreResult<Option<Record<E>>> {
        (**self).get(id)
    }

    fn update(&self, id: RecordId, fields: E) -> StoreResult<Record<E>> {
        (**self).update(id, fields)
    }

    fn delete(&self, id: RecordId) -> StoreResult<()> {
        (**self).delete(id)
    }

    fn find_unsynchronized(&self) -> StoreResult<Vec<Record<E>>> {
        (**self).find_unsynchronized()
    }

    fn mark_synchronized(&self, id: RecordId, at: DateTime<Utc>) -> StoreResult<()> {
        (**self).mark_synchronized(id, at)
    }

    fn mark_synchronized_at(
        &self,
        id: RecordId,
        revision: u64,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        (**self).mark_synchronized_at(id, revision, at)
    }

    fn find_where(&self, predicate: &dyn Fn(&Record<E>) -> bool) -> StoreResult<Vec<Record<E>>> {
        (**self).find_where(predicate)
    }

    fn count_unsynchronized(&self) -> StoreResult<usize> {
        (**self).count_unsynchronized()
    }
}
