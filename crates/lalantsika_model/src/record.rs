//! Record envelope and the entity trait.

use crate::kind::EntityKind;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary key assigned by the relational store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Returns the raw key.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        RecordId(id)
    }
}

/// A synchronizable entity.
///
/// Implementors are plain field structs; the store wraps them in a
/// [`Record`] that carries identity and sync-control state.
pub trait Entity: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The kind this entity belongs to.
    const KIND: EntityKind;

    /// Value that must be unique across the table, if any.
    fn unique_key(&self) -> Option<String> {
        None
    }

    /// Checks field-level constraints.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when a constraint is violated.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// A stored row: entity fields plus sync-control attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<E> {
    /// Primary key.
    pub id: RecordId,
    /// Entity fields.
    pub fields: E,
    /// True iff the current field values are known to match the mirror.
    pub synchronized: bool,
    /// When the last successful mirror write or read occurred.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Bumped by every local mutation.
    #[serde(default)]
    pub revision: u64,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
    /// Time of the last local mutation.
    pub updated_at: DateTime<Utc>,
}

impl<E> Record<E> {
    /// Returns true if a local mutation has not reached the mirror yet.
    pub fn is_dirty(&self) -> bool {
        !self.synchronized
    }
}
