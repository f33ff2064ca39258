//! Remote mirror trait definition.

use crate::error::RemoteResult;
use lalantsika_model::Document;
use serde_json::Value;

/// A document together with its key inside a collection.
pub type KeyedDocument = (String, Document);

/// A collection/document key-value store mirroring the relational store.
///
/// Backends translate their own failure taxonomy (auth, quota, network)
/// into [`crate::RemoteError`]. No method panics on ordinary
/// connectivity failure.
///
/// # Invariants
///
/// - `is_available` never fails; any error means `false`
/// - `put` overwrites the whole document
/// - `patch` merges top-level fields; a `null` field removes it
/// - `delete` of an absent document succeeds
pub trait RemoteMirror: Send + Sync {
    /// Cheap liveness probe, e.g. touching a sentinel path.
    fn is_available(&self) -> bool;

    /// Overwrites `collection/key` with `document`.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::RemoteError`] if the write was not confirmed.
    fn put(&self, collection: &str, key: &str, document: &Document) -> RemoteResult<()>;

    /// Merges `partial` into `collection/key`.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::RemoteError`] if the write was not confirmed.
    fn patch(&self, collection: &str, key: &str, partial: &Document) -> RemoteResult<()>;

    /// Reads `collection/key`.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::RemoteError`] if the read failed. An absent
    /// document is `Ok(None)`.
    fn get(&self, collection: &str, key: &str) -> RemoteResult<Option<Document>>;

    /// Returns every document whose `field` equals `value`. A `null` value
    /// also matches documents lacking `field`.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::RemoteError`] if the query failed.
    fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> RemoteResult<Vec<KeyedDocument>>;

    /// Returns the first document whose `field` equals `value`.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::RemoteError`] if the query failed.
    fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> RemoteResult<Option<KeyedDocument>> {
        Ok(self
            .query_by_field(collection, field, value)?
            .into_iter()
            .next())
    }

    /// Returns every document in `collection`, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::RemoteError`] if the read failed.
    fn list(&self, collection: &str) -> RemoteResult<Vec<KeyedDocument>>;

    /// Removes `collection/key`. Removing an absent document succeeds.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::RemoteError`] if the delete was not confirmed.
    fn delete(&self, collection: &str, key: &str) -> RemoteResult<()>;
}

impl<M: RemoteMirror + ?Sized> RemoteMirror for std::sync::Arc<M> {
    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn put(&self, collection: &str, key: &str, document: &Document) -> RemoteResult<()> {
        (**self).put(collection, key, document)
    }

    fn patch(&self, collection: &str, key: &str, partial: &Document) -> RemoteResult<()> {
        (**self).patch(collection, key, partial)
    }

    fn get(&self, collection: &str, key: &str) -> RemoteResult<Option<Document>> {
        (**self).get(collection, key)
    }

    fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> RemoteResult<Vec<KeyedDocument>> {
        (**self).query_by_field(collection, field, value)
    }

    fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> RemoteResult<Option<KeyedDocument>> {
        (**self).find_by_field(collection, field, value)
    }

    fn list(&self, collection: &str) -> RemoteResult<Vec<KeyedDocument>> {
        (**self).list(collection)
    }

    fn delete(&self, collection: &str, key: &str) -> RemoteResult<()> {
        (**self).delete(collection, key)
    }
}

/// Query matching with realtime-database semantics: a missing field is `null`.
pub(crate) fn field_matches(doc: &Document, field: &str, value: &Value) -> bool {
    doc.get(field).unwrap_or(&Value::Null) == value
}

/// Applies realtime-database merge semantics: `null` removes a field.
pub(crate) fn merge_into(target: &mut Document, partial: &Document) {
    for (field, value) in partial {
        if value.is_null() {
            target.remove(field);
        } else {
            target.insert(field.clone(), value.clone());
        }
    }
}

/// Rejects keys that would escape their collection.
pub(crate) fn check_key(part: &str) -> RemoteResult<()> {
    let bad = part.is_empty()
        || part
            .chars()
            .any(|c| matches!(c, '/' | '\\' | '.' | '#' | '$' | '[' | ']') || c.is_control());
    if bad {
        Err(crate::RemoteError::InvalidKey(part.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_removes_null_fields() {
        let mut doc = json!({"a": 1, "b": 2}).as_object().cloned().unwrap();
        let partial = json!({"b": null, "c": 3}).as_object().cloned().unwrap();
        merge_into(&mut doc, &partial);
        assert_eq!(serde_json::Value::Object(doc), json!({"a": 1, "c": 3}));
    }

    #[test]
    fn key_checks() {
        assert!(check_key("-Nabc123").is_ok());
        assert!(check_key("42").is_ok());
        assert!(check_key("").is_err());
        assert!(check_key("..").is_err());
        assert!(check_key("a/b").is_err());
        assert!(check_key("a.b").is_err());
    }
}
