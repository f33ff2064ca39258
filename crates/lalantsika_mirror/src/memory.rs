//! In-memory mirror for testing.

use crate::error::{RemoteError, RemoteResult};
use crate::mirror::{check_key, field_matches, merge_into, KeyedDocument, RemoteMirror};
use lalantsika_model::Document;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

type Collections = BTreeMap<String, BTreeMap<String, Document>>;

/// An in-memory mirror with fault injection.
///
/// Plays both the remote document store and, through [`MemoryMirror::push`],
/// the mobile app writing to it directly.
#[derive(Debug)]
pub struct MemoryMirror {
    collections: RwLock<Collections>,
    available: AtomicBool,
    fail_all_writes: AtomicBool,
    failing: RwLock<HashSet<(String, String)>>,
    latency: RwLock<Option<Duration>>,
    push_seq: AtomicU64,
    writes: AtomicU64,
    scans: AtomicU64,
}

impl MemoryMirror {
    /// Creates an empty, available mirror.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            fail_all_writes: AtomicBool::new(false),
            failing: RwLock::new(HashSet::new()),
            latency: RwLock::new(None),
            push_seq: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            scans: AtomicU64::new(0),
        }
    }

    /// Sets the availability reported by the probe. An unavailable mirror
    /// also fails every call with a network error.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Makes every put/patch/delete fail.
    pub fn set_fail_all_writes(&self, fail: bool) {
        self.fail_all_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes writes to `collection/key` fail until cleared.
    pub fn fail_writes_for(&self, collection: &str, key: &str) {
        self.failing
            .write()
            .insert((collection.to_string(), key.to_string()));
    }

    /// Clears every injected write failure.
    pub fn clear_failures(&self) {
        self.failing.write().clear();
        self.fail_all_writes.store(false, Ordering::SeqCst);
    }

    /// Delays every call, to exercise timeouts.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Writes a document under a fresh, time-ordered key, the way the
    /// mobile app creates remote-origin documents. Bypasses fault injection.
    pub fn push(&self, collection: &str, document: Document) -> String {
        let seq = self.push_seq.fetch_add(1, Ordering::SeqCst);
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let key = format!("-M{seq:08}{}", &suffix[..8]);
        self.insert_raw(collection, &key, document);
        key
    }

    /// Writes a document directly. Bypasses fault injection.
    pub fn insert_raw(&self, collection: &str, key: &str, document: Document) {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), document);
    }

    /// Removes a document directly, simulating cache eviction.
    pub fn evict(&self, collection: &str, key: &str) -> Option<Document> {
        self.collections
            .write()
            .get_mut(collection)
            .and_then(|docs| docs.remove(key))
    }

    /// Reads a document directly.
    pub fn document(&self, collection: &str, key: &str) -> Option<Document> {
        self.collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(key).cloned())
    }

    /// Number of documents in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Returns true if `collection` holds no documents.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Number of confirmed writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of whole-collection listings so far.
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::SeqCst)
    }

    fn before_call(&self) -> RemoteResult<()> {
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(RemoteError::network("mirror unreachable"));
        }
        Ok(())
    }

    fn before_write(&self, collection: &str, key: &str) -> RemoteResult<()> {
        self.before_call()?;
        check_key(collection)?;
        check_key(key)?;
        let injected = self.fail_all_writes.load(Ordering::SeqCst)
            || self
                .failing
                .read()
                .contains(&(collection.to_string(), key.to_string()));
        if injected {
            return Err(RemoteError::network(format!(
                "injected write failure for {collection}/{key}"
            )));
        }
        Ok(())
    }
}

impl Default for MemoryMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteMirror for MemoryMirror {
    fn is_available(&self) -> bool {
        self.before_call().is_ok()
    }

    fn put(&self, collection: &str, key: &str, document: &Document) -> RemoteResult<()> {
        self.before_write(collection, key)?;
        self.insert_raw(collection, key, document.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn patch(&self, collection: &str, key: &str, partial: &Document) -> RemoteResult<()> {
        self.before_write(collection, key)?;
        let mut collections = self.collections.write();
        let doc = collections
            .entry(collection.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default();
        merge_into(doc, partial);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, collection: &str, key: &str) -> RemoteResult<Option<Document>> {
        self.before_call()?;
        Ok(self.document(collection, key))
    }

    fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> RemoteResult<Vec<KeyedDocument>> {
        self.before_call()?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| field_matches(doc, field, value))
                    .map(|(k, doc)| (k.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list(&self, collection: &str) -> RemoteResult<Vec<KeyedDocument>> {
        self.before_call()?;
        self.scans.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|docs| docs.iter().map(|(k, d)| (k.clone(), d.clone())).collect())
            .unwrap_or_default())
    }

    fn delete(&self, collection: &str, key: &str) -> RemoteResult<()> {
        self.before_write(collection, key)?;
        self.evict(collection, key);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn null_query_matches_missing_field() {
        let mirror = MemoryMirror::new();
        mirror.insert_raw("reports", "a", doc(json!({"id": 1, "synchronized": true})));
        mirror.insert_raw("reports", "b", doc(json!({"synchronized": true})));
        mirror.insert_raw("reports", "c", doc(json!({"id": null})));

        let missing = mirror.query_by_field("reports", "id", &Value::Null).unwrap();
        let keys: Vec<_> = missing.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["b", "c"]);
        assert_eq!(mirror.scan_count(), 0);
    }

    #[test]
    fn put_get_delete() {
        let mirror = MemoryMirror::new();
        mirror.put("users", "7", &doc(json!({"email": "a@b.com"}))).unwrap();
        assert_eq!(
            mirror.get("users", "7").unwrap().unwrap()["email"],
            json!("a@b.com")
        );

        mirror.delete("users", "7").unwrap();
        assert!(mirror.get("users", "7").unwrap().is_none());
        // Idempotent.
        mirror.delete("users", "7").unwrap();
    }

    #[test]
    fn patch_merges_and_creates() {
        let mirror = MemoryMirror::new();
        mirror.patch("signalements", "k", &doc(json!({"a": 1}))).unwrap();
        mirror
            .patch("signalements", "k", &doc(json!({"b": 2, "a": null})))
            .unwrap();
        assert_eq!(
            Value::Object(mirror.document("signalements", "k").unwrap()),
            json!({"b": 2})
        );
    }

    #[test]
    fn query_and_find_by_field() {
        let mirror = MemoryMirror::new();
        let first = mirror.push("signalements", doc(json!({"synchronized": false})));
        mirror.push("signalements", doc(json!({"synchronized": true})));
        mirror.push("signalements", doc(json!({"synchronized": false})));

        let pending = mirror
            .query_by_field("signalements", "synchronized", &json!(false))
            .unwrap();
        assert_eq!(pending.len(), 2);

        let (key, _) = mirror
            .find_by_field("signalements", "synchronized", &json!(false))
            .unwrap()
            .unwrap();
        assert_eq!(key, first);
    }

    #[test]
    fn push_keys_are_time_ordered() {
        let mirror = MemoryMirror::new();
        let keys: Vec<_> = (0..5)
            .map(|i| mirror.push("c", doc(json!({ "i": i }))))
            .collect();
        let listed: Vec<_> = mirror.list("c").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, listed);
    }

    #[test]
    fn unavailable_mirror() {
        let mirror = MemoryMirror::new();
        mirror.set_available(false);
        assert!(!mirror.is_available());
        assert!(mirror.get("users", "1").is_err());
        assert!(mirror.put("users", "1", &Document::new()).is_err());
    }

    #[test]
    fn injected_failures_are_per_key() {
        let mirror = MemoryMirror::new();
        mirror.fail_writes_for("users", "2");
        assert!(mirror.put("users", "1", &Document::new()).is_ok());
        assert!(mirror.put("users", "2", &Document::new()).is_err());
        assert_eq!(mirror.write_count(), 1);

        mirror.clear_failures();
        assert!(mirror.put("users", "2", &Document::new()).is_ok());
    }
}
