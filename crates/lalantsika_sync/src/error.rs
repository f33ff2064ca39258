//! Error types for the sync engine.

use lalantsika_mirror::RemoteError;
use lalantsika_model::{EntityKind, RecordId};
use lalantsika_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Failures that abort a pass or a full sync.
///
/// Per-record problems never surface here; they are reduced into
/// [`crate::PassCounts`]. Only the record store itself failing is fatal.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The record store is unreachable or its data is unreadable.
    #[error("record store failure: {0}")]
    Store(StoreError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        SyncError::Store(err)
    }
}

/// Why a single record could not be reconciled.
///
/// The record is left as it was and retried on the next pass.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordFailure {
    /// The probe failed before the record was attempted.
    #[error("remote mirror unavailable")]
    RemoteUnavailable,

    /// A put, patch or delete was not confirmed.
    #[error("remote write to {collection}/{key} failed: {source}")]
    RemoteWrite {
        /// Target collection.
        collection: String,
        /// Target key.
        key: String,
        /// Backend error.
        #[source]
        source: RemoteError,
    },

    /// The local record disappeared mid-pass.
    #[error("{kind} {id} not found locally")]
    LocalNotFound {
        /// Entity kind.
        kind: EntityKind,
        /// Missing id.
        id: RecordId,
    },

    /// The local record changed while its previous revision was being
    /// written; it stays dirty.
    #[error("{kind} {id} changed during the mirror write")]
    Superseded {
        /// Entity kind.
        kind: EntityKind,
        /// Record id.
        id: RecordId,
    },

    /// A remote document could not be turned into a valid record.
    #[error("invalid {kind} document {key}: {message}")]
    Validation {
        /// Entity kind.
        kind: EntityKind,
        /// Mirror key of the offending document.
        key: String,
        /// Reason.
        message: String,
    },

    /// A required reference in a remote document matches no local record.
    #[error("{kind} document {key} references unknown {reference}")]
    UnresolvedReference {
        /// Entity kind.
        kind: EntityKind,
        /// Mirror key of the document.
        key: String,
        /// What could not be matched.
        reference: String,
    },
}

impl RecordFailure {
    pub(crate) fn remote_write(collection: &str, key: &str, source: RemoteError) -> Self {
        Self::RemoteWrite {
            collection: collection.to_string(),
            key: key.to_string(),
            source,
        }
    }
}

/// Splits a store error into fatal and per-record failures.
pub(crate) fn per_record(err: StoreError, key: &str) -> SyncResult<RecordFailure> {
    match err {
        StoreError::Validation { kind, message } => Ok(RecordFailure::Validation {
            kind,
            key: key.to_string(),
            message,
        }),
        StoreError::NotFound { kind, id } => Ok(RecordFailure::LocalNotFound { kind, id }),
        structural => Err(SyncError::Store(structural)),
    }
}
