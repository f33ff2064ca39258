//! Error types for store operations.

use lalantsika_model::{EntityKind, RecordId};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A field or uniqueness constraint was violated.
    #[error("validation failed for {kind}: {message}")]
    Validation {
        /// Entity kind.
        kind: EntityKind,
        /// Reason.
        message: String,
    },

    /// The record does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Entity kind.
        kind: EntityKind,
        /// Missing id.
        id: RecordId,
    },

    /// The store itself cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Persisted data could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    /// Creates a validation error.
    pub fn validation(kind: EntityKind, message: impl Into<String>) -> Self {
        Self::Validation {
            kind,
            message: message.into(),
        }
    }

    /// Returns true if the store as a whole failed, as opposed to one record.
    pub fn is_structural(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Storage(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_classification() {
        assert!(StoreError::Unavailable("down".into()).is_structural());
        assert!(StoreError::Storage("disk full".into()).is_structural());
        assert!(!StoreError::validation(EntityKind::User, "dup").is_structural());
        assert!(!StoreError::NotFound {
            kind: EntityKind::Report,
            id: RecordId(4),
        }
        .is_structural());
    }

    #[test]
    fn error_display() {
        let err = StoreError::NotFound {
            kind: EntityKind::Report,
            id: RecordId(42),
        };
        assert_eq!(err.to_string(), "report 42 not found");
    }
}
