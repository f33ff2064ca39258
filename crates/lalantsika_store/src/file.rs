//! JSON-file record store for persistent storage.

use crate::error::{StoreError, StoreResult};
use crate::store::RecordStore;
use crate::table::{Table, TableImage};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use lalantsika_model::{Entity, Record, RecordId};
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A record store persisting one table as a JSON file.
///
/// The table lives in memory and every mutation is written through to
/// `<dir>/<kind>.json` before the call returns. Writes go to a temporary
/// file that is then renamed over the table file, so a crash leaves
/// either the old or the new image, never a torn one.
///
/// If the write fails the in-memory table is rolled back, so the caller
/// never observes a mutation that is not durable.
///
/// # Example
///
/// ```no_run
/// use lalantsika_model::Parameter;
/// use lalantsika_store::{JsonFileStore, RecordStore};
/// use std::path::Path;
///
/// let store = JsonFileStore::<Parameter>::open(Path::new("data")).unwrap();
/// store.create(Parameter::new("max_login_attempts", "3")).unwrap();
/// ```
#[derive(Debug)]
pub struct JsonFileStore<E> {
    path: PathBuf,
    table: RwLock<Table<E>>,
}

impl<E: Entity> JsonFileStore<E> {
    /// Opens or creates the table file inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the
    /// existing table file cannot be parsed.
    pub fn open(dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", E::KIND));

        let table = if path.exists() {
            let bytes = fs::read(&path)?;
            let image: TableImage<E> = serde_json::from_slice(&bytes)?;
            Table::from_image(image)?
        } else {
            Table::default()
        };

        tracing::debug!(kind = %E::KIND, path = %path.display(), "opened table file");

        Ok(Self {
            path,
            table: RwLock::new(table),
        })
    }

    /// Returns the path of the table file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, table: &Table<E>) -> StoreResult<()> {
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&table.to_image())?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Applies `op` and writes the table through if it reports a change.
    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut Table<E>) -> StoreResult<(T, bool)>,
    ) -> StoreResult<T> {
        let mut table = self.table.write();
        let before = table.to_image();
        let (value, changed) = op(&mut table)?;
        if changed {
            if let Err(err) = self.persist(&table) {
                tracing::error!(kind = %E::KIND, error = %err, "table write failed, rolling back");
                *table = Table::from_image(before)?;
                return Err(err);
            }
        }
        Ok(value)
    }
}

impl<E: Entity> RecordStore<E> for JsonFileStore<E> {
    fn create(&self, fields: E) -> StoreResult<Record<E>> {
        self.mutate(|t| t.create(fields, Utc::now()).map(|r| (r, true)))
    }

    fn get(&self, id: RecordId) -> StoreResult<Option<Record<E>>> {
        Ok(self.table.read().get(id))
    }

    fn update(&self, id: RecordId, fields: E) -> StoreResult<Record<E>> {
        self.mutate(|t| t.update(id, fields, Utc::now()).map(|r| (r, true)))
    }

    fn delete(&self, id: RecordId) -> StoreResult<()> {
        self.mutate(|t| Ok(((), t.delete(id))))
    }

    fn find_unsynchronized(&self) -> StoreResult<Vec<Record<E>>> {
        Ok(self.table.read().unsynchronized())
    }

    fn mark_synchronized(&self, id: RecordId, at: DateTime<Utc>) -> StoreResult<()> {
        self.mutate(|t| Ok(((), t.mark_synchronized(id, None, at))))
    }

    fn mark_synchronized_at(
        &self,
        id: RecordId,
        revision: u64,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.mutate(|t| {
            let changed = t.mark_synchronized(id, Some(revision), at);
            Ok((changed, changed))
        })
    }

    fn find_where(&self, predicate: &dyn Fn(&Record<E>) -> bool) -> StoreResult<Vec<Record<E>>> {
        Ok(self.table.read().find_where(predicate))
    }

    fn count_unsynchronized(&self) -> StoreResult<usize> {
        Ok(self.table.read().count_unsynchronized())
    }
}

/// Exclusive advisory lock on a data directory.
///
/// Held for the duration of a sync run so two processes never run
/// passes against the same store files at once. Released on drop.
#[derive(Debug)]
pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Tries to take the lock on `dir` without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if another process holds it.
    pub fn try_acquire(dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(".sync.lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive().map_err(|_| {
            StoreError::Unavailable(format!("{} is locked by another sync", dir.display()))
        })?;
        Ok(Self { file, path })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lalantsika_model::{Parameter, User};
    use tempfile::TempDir;

    #[test]
    fn records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = JsonFileStore::<User>::open(dir.path()).unwrap();
            let user = store.create(User::new("a@b.com", "Rakoto")).unwrap();
            store.mark_synchronized(user.id, Utc::now()).unwrap();
            user.id
        };

        let store = JsonFileStore::<User>::open(dir.path()).unwrap();
        let user = store.get(id).unwrap().unwrap();
        assert_eq!(user.fields.email, "a@b.com");
        assert!(user.synchronized);
        assert!(user.last_sync_at.is_some());
    }

    #[test]
    fn ids_continue_after_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = JsonFileStore::<Parameter>::open(dir.path()).unwrap();
            let p = store.create(Parameter::new("a", "1")).unwrap();
            store.create(Parameter::new("b", "2")).unwrap();
            store.delete(p.id).unwrap();
        }

        let store = JsonFileStore::<Parameter>::open(dir.path()).unwrap();
        let p = store.create(Parameter::new("c", "3")).unwrap();
        assert_eq!(p.id, RecordId(3));
    }

    #[test]
    fn uniqueness_enforced_after_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = JsonFileStore::<Parameter>::open(dir.path()).unwrap();
            store.create(Parameter::new("a", "1")).unwrap();
        }
        let store = JsonFileStore::<Parameter>::open(dir.path()).unwrap();
        assert!(store.create(Parameter::new("a", "2")).is_err());
    }

    #[test]
    fn file_named_after_kind() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::<Parameter>::open(dir.path()).unwrap();
        store.create(Parameter::new("a", "1")).unwrap();
        assert!(dir.path().join("parameter.json").exists());
        assert_eq!(store.path(), dir.path().join("parameter.json"));
    }

    #[test]
    fn dir_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let lock = DirLock::try_acquire(dir.path()).unwrap();
        assert!(DirLock::try_acquire(dir.path()).is_err());
        drop(lock);
        assert!(DirLock::try_acquire(dir.path()).is_ok());
    }
}
