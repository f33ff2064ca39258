//! Directory-backed mirror.

use crate::error::{RemoteError, RemoteResult};
use crate::mirror::{check_key, field_matches, merge_into, KeyedDocument, RemoteMirror};
use lalantsika_model::Document;
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A mirror storing each document as `<root>/<collection>/<key>.json`.
///
/// Useful for running the sync core against an exported or emulated
/// document store without network access. The probe writes
/// `<root>/<probe>.json`; a missing or read-only root reports unavailable.
#[derive(Debug, Clone)]
pub struct DirMirror {
    root: PathBuf,
    probe: String,
}

impl DirMirror {
    /// Creates a mirror rooted at `root`. The directory is not created;
    /// an absent root is reported as unavailable.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            probe: "_health".into(),
        }
    }

    /// Sets the probe sentinel name.
    pub fn with_probe_path(mut self, probe: impl Into<String>) -> Self {
        self.probe = probe.into();
        self
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn doc_path(&self, collection: &str, key: &str) -> RemoteResult<PathBuf> {
        check_key(collection)?;
        check_key(key)?;
        Ok(self.root.join(collection).join(format!("{key}.json")))
    }

    fn io_error(err: std::io::Error) -> RemoteError {
        match err.kind() {
            ErrorKind::PermissionDenied => RemoteError::Auth(err.to_string()),
            _ => RemoteError::network(err.to_string()),
        }
    }

    fn read(path: &Path) -> RemoteResult<Option<Document>> {
        match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(doc)) => Ok(Some(doc)),
                Ok(other) => Err(RemoteError::InvalidResponse(format!(
                    "{} is not a document: {other}",
                    path.display()
                ))),
                Err(e) => Err(RemoteError::InvalidResponse(e.to_string())),
            },
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::io_error(err)),
        }
    }

    fn write(path: &Path, doc: &Document) -> RemoteResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Self::io_error)?;
        }
        let bytes = serde_json::to_vec_pretty(doc)
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(Self::io_error)?;
        fs::rename(&tmp, path).map_err(Self::io_error)
    }

    fn ensure_root(&self) -> RemoteResult<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(RemoteError::network(format!(
                "mirror root {} is not mounted",
                self.root.display()
            )))
        }
    }
}

impl RemoteMirror for DirMirror {
    fn is_available(&self) -> bool {
        if self.ensure_root().is_err() {
            return false;
        }
        let mut stamp = Document::new();
        stamp.insert(
            "checked_at".into(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        Self::write(&self.root.join(format!("{}.json", self.probe)), &stamp).is_ok()
    }

    fn put(&self, collection: &str, key: &str, document: &Document) -> RemoteResult<()> {
        self.ensure_root()?;
        Self::write(&self.doc_path(collection, key)?, document)
    }

    fn patch(&self, collection: &str, key: &str, partial: &Document) -> RemoteResult<()> {
        self.ensure_root()?;
        let path = self.doc_path(collection, key)?;
        let mut doc = Self::read(&path)?.unwrap_or_default();
        merge_into(&mut doc, partial);
        Self::write(&path, &doc)
    }

    fn get(&self, collection: &str, key: &str) -> RemoteResult<Option<Document>> {
        self.ensure_root()?;
        Self::read(&self.doc_path(collection, key)?)
    }

    fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> RemoteResult<Vec<KeyedDocument>> {
        Ok(self
            .list(collection)?
            .into_iter()
            .filter(|(_, doc)| field_matches(doc, field, value))
            .collect())
    }

    fn list(&self, collection: &str) -> RemoteResult<Vec<KeyedDocument>> {
        self.ensure_root()?;
        check_key(collection)?;
        let dir = self.root.join(collection);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Self::io_error(err)),
        };

        let mut docs = Vec::new();
        for entry in entries {
            let path = entry.map_err(Self::io_error)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let key = key.to_string();
            if let Some(doc) = Self::read(&path)? {
                docs.push((key, doc));
            }
        }
        docs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(docs)
    }

    fn delete(&self, collection: &str, key: &str) -> RemoteResult<()> {
        self.ensure_root()?;
        match fs::remove_file(self.doc_path(collection, key)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Self::io_error(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn missing_root_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let mirror = DirMirror::new(dir.path().join("absent"));
        assert!(!mirror.is_available());
        assert!(mirror.get("users", "1").is_err());
    }

    #[test]
    fn probe_touches_sentinel() {
        let dir = TempDir::new().unwrap();
        let mirror = DirMirror::new(dir.path());
        assert!(mirror.is_available());
        assert!(dir.path().join("_health.json").exists());
    }

    #[test]
    fn documents_round_trip_on_disk() {
        let dir = TempDir::new().unwrap();
        let mirror = DirMirror::new(dir.path());

        mirror
            .put("signalements", "3", &doc(json!({"description": "pothole"})))
            .unwrap();
        mirror
            .patch("signalements", "3", &doc(json!({"synchronized": true})))
            .unwrap();

        let stored = mirror.get("signalements", "3").unwrap().unwrap();
        assert_eq!(stored["description"], json!("pothole"));
        assert_eq!(stored["synchronized"], json!(true));

        let found = mirror
            .find_by_field("signalements", "synchronized", &json!(true))
            .unwrap();
        assert_eq!(found.unwrap().0, "3");

        mirror.delete("signalements", "3").unwrap();
        mirror.delete("signalements", "3").unwrap();
        assert!(mirror.list("signalements").unwrap().is_empty());
    }
}
