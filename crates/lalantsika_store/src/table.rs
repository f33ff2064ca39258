//! In-memory table shared by the store backends.

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use lalantsika_model::{Entity, Record, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Rows of one entity kind plus the uniqueness index.
///
/// Ids are assigned monotonically, so `BTreeMap` order is insertion order.
#[derive(Debug)]
pub(crate) struct Table<E> {
    next_id: u64,
    rows: BTreeMap<RecordId, Record<E>>,
    unique: HashMap<String, RecordId>,
}

/// On-disk form of a [`Table`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "E: Entity")]
pub(crate) struct TableImage<E> {
    pub next_id: u64,
    pub rows: Vec<Record<E>>,
}

impl<E: Entity> Default for Table<E> {
    fn default() -> Self {
        Self {
            next_id: 1,
            rows: BTreeMap::new(),
            unique: HashMap::new(),
        }
    }
}

impl<E: Entity> Table<E> {
    pub fn from_image(image: TableImage<E>) -> StoreResult<Self> {
        let mut table = Table {
            next_id: image.next_id.max(1),
            ..Table::default()
        };
        for row in image.rows {
            if let Some(key) = row.fields.unique_key() {
                if table.unique.insert(key.clone(), row.id).is_some() {
                    return Err(StoreError::Storage(format!(
                        "duplicate {} key {key:?} in persisted table",
                        E::KIND
                    )));
                }
            }
            table.next_id = table.next_id.max(row.id.get() + 1);
            table.rows.insert(row.id, row);
        }
        Ok(table)
    }

    pub fn to_image(&self) -> TableImage<E> {
        TableImage {
            next_id: self.next_id,
            rows: self.rows.values().cloned().collect(),
        }
    }

    fn check_unique(&self, fields: &E, own_id: Option<RecordId>) -> StoreResult<()> {
        if let Some(key) = fields.unique_key() {
            match self.unique.get(&key) {
                Some(existing) if Some(*existing) != own_id => {
                    return Err(StoreError::validation(
                        E::KIND,
                        format!("duplicate key {key:?} (held by {existing})"),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn create(&mut self, fields: E, now: DateTime<Utc>) -> StoreResult<Record<E>> {
        fields
            .validate()
            .map_err(|msg| StoreError::validation(E::KIND, msg))?;
        self.check_unique(&fields, None)?;

        let id = RecordId(self.next_id);
        self.next_id += 1;

        if let Some(key) = fields.unique_key() {
            self.unique.insert(key, id);
        }

        let record = Record {
            id,
            fields,
            synchronized: false,
            last_sync_at: None,
            revision: 1,
            created_at: now,
            updated_at: now,
        };
        self.rows.insert(id, record.clone());
        Ok(record)
    }

    pub fn get(&self, id: RecordId) -> Option<Record<E>> {
        self.rows.get(&id).cloned()
    }

    pub fn update(
        &mut self,
        id: RecordId,
        fields: E,
        now: DateTime<Utc>,
    ) -> StoreResult<Record<E>> {
        if !self.rows.contains_key(&id) {
            return Err(StoreError::NotFound { kind: E::KIND, id });
        }
        fields
            .validate()
            .map_err(|msg| StoreError::validation(E::KIND, msg))?;
        self.check_unique(&fields, Some(id))?;

        let Some(row) = self.rows.get_mut(&id) else {
            return Err(StoreError::NotFound { kind: E::KIND, id });
        };
        if let Some(old_key) = row.fields.unique_key() {
            self.unique.remove(&old_key);
        }
        if let Some(new_key) = fields.unique_key() {
            self.unique.insert(new_key, id);
        }

        row.fields = fields;
        row.synchronized = false;
        row.revision += 1;
        row.updated_at = now;
        Ok(row.clone())
    }

    /// Returns true if a row was removed.
    pub fn delete(&mut self, id: RecordId) -> bool {
        match self.rows.remove(&id) {
            Some(row) => {
                if let Some(key) = row.fields.unique_key() {
                    self.unique.remove(&key);
                }
                true
            }
            None => false,
        }
    }

    pub fn unsynchronized(&self) -> Vec<Record<E>> {
        self.rows
            .values()
            .filter(|r| !r.synchronized)
            .cloned()
            .collect()
    }

    /// Returns true if a row changed.
    pub fn mark_synchronized(
        &mut self,
        id: RecordId,
        revision: Option<u64>,
        at: DateTime<Utc>,
    ) -> bool {
        match self.rows.get_mut(&id) {
            Some(row) if revision.map_or(true, |rev| rev == row.revision) => {
                row.synchronized = true;
                row.last_sync_at = Some(at);
                true
            }
            _ => false,
        }
    }

    pub fn find_where(&self, predicate: &dyn Fn(&Record<E>) -> bool) -> Vec<Record<E>> {
        self.rows
            .values()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn count_unsynchronized(&self) -> usize {
        self.rows.values().filter(|r| !r.synchronized).count()
    }
}
