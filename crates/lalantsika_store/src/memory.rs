//! In-memory record store for testing.

use crate::error::{StoreError, StoreResult};
use crate::store::RecordStore;
use crate::table::Table;
use chrono::{DateTime, Utc};
use lalantsika_model::{Entity, Record, RecordId};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// An in-memory record store.
///
/// Suitable for unit tests, integration tests and ephemeral runs.
/// Each call takes the table lock once, so a mutation and its
/// `synchronized = false` flag are applied in the same step.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use lalantsika_model::User;
/// use lalantsika_store::{MemoryStore, RecordStore};
///
/// let store = MemoryStore::<User>::new();
/// let user = store.create(User::new("a@b.com", "Rakoto")).unwrap();
/// store.mark_synchronized(user.id, Utc::now()).unwrap();
/// assert!(store.find_unsynchronized().unwrap().is_empty());
/// ```
#[derive(Debug)]
pub struct MemoryStore<E> {
    table: RwLock<Table<E>>,
    unavailable: AtomicBool,
}

impl<E: Entity> MemoryStore<E> {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Table::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulates the database going away; every call then fails with
    /// [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// Returns true if the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(format!("{} table offline", E::KIND)))
        } else {
            Ok(())
        }
    }
}

impl<E: Entity> Default for MemoryStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> RecordStore<E> for MemoryStore<E> {
    fn create(&self, fields: E) -> StoreResult<Record<E>> {
        self.check_available()?;
        self.table.write().create(fields, Utc::now())
    }

    fn get(&self, id: RecordId) -> StoreResult<Option<Record<E>>> {
        self.check_available()?;
        Ok(self.table.read().get(id))
    }

    fn update(&self, id: RecordId, fields: E) -> StoreResult<Record<E>> {
        self.check_available()?;
        self.table.write().update(id, fields, Utc::now())
    }

    fn delete(&self, id: RecordId) -> StoreResult<()> {
        self.check_available()?;
        self.table.write().delete(id);
        Ok(())
    }

    fn find_unsynchronized(&self) -> StoreResult<Vec<Record<E>>> {
        self.check_available()?;
        Ok(self.table.read().unsynchronized())
    }

    fn mark_synchronized(&self, id: RecordId, at: DateTime<Utc>) -> StoreResult<()> {
        self.check_available()?;
        self.table.write().mark_synchronized(id, None, at);
        Ok(())
    }

    fn mark_synchronized_at(
        &self,
        id: RecordId,
        revision: u64,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.check_available()?;
        Ok(self.table.write().mark_synchronized(id, Some(revision), at))
    }

    fn find_where(&self, predicate: &dyn Fn(&Record<E>) -> bool) -> StoreResult<Vec<Record<E>>> {
        self.check_available()?;
        Ok(self.table.read().find_where(predicate))
    }

    fn count_unsynchronized(&self) -> StoreResult<usize> {
        self.check_available()?;
        Ok(self.table.read().count_unsynchronized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lalantsika_model::{Parameter, User};

    #[test]
    fn create_starts_dirty() {
        let store = MemoryStore::<User>::new();
        let user = store.create(User::new("a@b.com", "Rakoto")).unwrap();

        assert_eq!(user.id, RecordId(1));
        assert!(!user.synchronized);
        assert!(user.last_sync_at.is_none());
        assert_eq!(user.revision, 1);
    }

    #[test]
    fn create_rejects_duplicate_email() {
        let store = MemoryStore::<User>::new();
        store.create(User::new("a@b.com", "Rakoto")).unwrap();

        let err = store.create(User::new("A@b.com", "Rabe")).unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_forces_dirty_and_bumps_revision() {
        let store = MemoryStore::<Parameter>::new();
        let p = store.create(Parameter::new("lock_minutes", "15")).unwrap();
        store.mark_synchronized(p.id, Utc::now()).unwrap();
        assert!(store.get(p.id).unwrap().unwrap().synchronized);

        let updated = store
            .update(p.id, Parameter::new("lock_minutes", "30"))
            .unwrap();
        assert!(!updated.synchronized);
        assert_eq!(updated.revision, 2);
        assert_eq!(store.find_unsynchronized().unwrap().len(), 1);
    }

    #[test]
    fn update_missing_is_not_found() {
        let store = MemoryStore::<Parameter>::new();
        let err = store
            .update(RecordId(9), Parameter::new("x", "y"))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn update_may_keep_own_unique_key() {
        let store = MemoryStore::<User>::new();
        let user = store.create(User::new("a@b.com", "Rakoto")).unwrap();
        let mut fields = user.fields.clone();
        fields.name = "Rakotobe".into();
        assert!(store.update(user.id, fields).is_ok());
    }

    #[test]
    fn delete_is_idempotent() {
        let store = MemoryStore::<Parameter>::new();
        let p = store.create(Parameter::new("k", "v")).unwrap();
        store.delete(p.id).unwrap();
        store.delete(p.id).unwrap();
        assert!(store.is_empty());

        // Key is free again after delete.
        assert!(store.create(Parameter::new("k", "v2")).is_ok());
    }

    #[test]
    fn mark_synchronized_absent_is_noop() {
        let store = MemoryStore::<Parameter>::new();
        assert!(store.mark_synchronized(RecordId(3), Utc::now()).is_ok());
    }

    #[test]
    fn mark_at_stale_revision_keeps_row_dirty() {
        let store = MemoryStore::<Parameter>::new();
        let p = store.create(Parameter::new("k", "v")).unwrap();
        store.update(p.id, Parameter::new("k", "v2")).unwrap();

        assert!(!store.mark_synchronized_at(p.id, p.revision, Utc::now()).unwrap());
        assert!(!store.get(p.id).unwrap().unwrap().synchronized);

        assert!(store.mark_synchronized_at(p.id, 2, Utc::now()).unwrap());
        assert!(store.get(p.id).unwrap().unwrap().synchronized);
    }

    #[test]
    fn unsynchronized_in_insertion_order() {
        let store = MemoryStore::<Parameter>::new();
        for key in ["c", "a", "b"] {
            store.create(Parameter::new(key, "1")).unwrap();
        }
        let keys: Vec<_> = store
            .find_unsynchronized()
            .unwrap()
            .into_iter()
            .map(|r| r.fields.key)
            .collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }

    #[test]
    fn unavailable_store_fails_structurally() {
        let store = MemoryStore::<Parameter>::new();
        store.set_unavailable(true);
        let err = store.find_unsynchronized().unwrap_err();
        assert!(err.is_structural());
    }
}
