//! Per-call deadline for any mirror.

use crate::error::{RemoteError, RemoteResult};
use crate::mirror::{KeyedDocument, RemoteMirror};
use lalantsika_model::Document;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};

/// Bounds every call on the wrapped mirror by a deadline.
///
/// Each call runs on the blocking pool of a private runtime and is
/// abandoned when the deadline passes, surfacing as
/// [`RemoteError::Timeout`]. An abandoned write may still land later;
/// callers treat a timeout as an unconfirmed write and leave the record
/// dirty.
///
/// Calls block the current thread and must not be made from inside an
/// async runtime.
pub struct TimeoutMirror<M: ?Sized> {
    inner: Arc<M>,
    timeout: Duration,
    runtime: Option<Runtime>,
}

impl<M: RemoteMirror + ?Sized + 'static> TimeoutMirror<M> {
    /// Wraps `inner` with a per-call `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the private runtime cannot start.
    pub fn new(inner: Arc<M>, timeout: Duration) -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .thread_name("lalantsika-mirror")
            .build()?;
        Ok(Self {
            inner,
            timeout,
            runtime: Some(runtime),
        })
    }

    /// Returns the per-call deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the wrapped mirror.
    pub fn inner(&self) -> &Arc<M> {
        &self.inner
    }

    fn run<T, F>(&self, op: F) -> RemoteResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&M) -> RemoteResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let Some(runtime) = self.runtime.as_ref() else {
            return op(&inner);
        };
        let deadline = self.timeout;
        runtime.block_on(async move {
            let call = tokio::task::spawn_blocking(move || op(&inner));
            match tokio::time::timeout(deadline, call).await {
                Ok(Ok(result)) => result,
                Ok(Err(join)) => Err(RemoteError::network_fatal(format!(
                    "mirror call aborted: {join}"
                ))),
                Err(_) => {
                    tracing::debug!(?deadline, "mirror call timed out");
                    Err(RemoteError::Timeout)
                }
            }
        })
    }
}

impl<M: ?Sized> Drop for TimeoutMirror<M> {
    fn drop(&mut self) {
        // Abandoned calls must not hold the caller up.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl<M: ?Sized> std::fmt::Debug for TimeoutMirror<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutMirror")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<M: RemoteMirror + ?Sized + 'static> RemoteMirror for TimeoutMirror<M> {
    fn is_available(&self) -> bool {
        self.run(|m| Ok(m.is_available())).unwrap_or(false)
    }

    fn put(&self, collection: &str, key: &str, document: &Document) -> RemoteResult<()> {
        let (collection, key) = (collection.to_string(), key.to_string());
        let document = document.clone();
        self.run(move |m| m.put(&collection, &key, &document))
    }

    fn patch(&self, collection: &str, key: &str, partial: &Document) -> RemoteResult<()> {
        let (collection, key) = (collection.to_string(), key.to_string());
        let partial = partial.clone();
        self.run(move |m| m.patch(&collection, &key, &partial))
    }

    fn get(&self, collection: &str, key: &str) -> RemoteResult<Option<Document>> {
        let (collection, key) = (collection.to_string(), key.to_string());
        self.run(move |m| m.get(&collection, &key))
    }

    fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> RemoteResult<Vec<KeyedDocument>> {
        let (collection, field, value) = (collection.to_string(), field.to_string(), value.clone());
        self.run(move |m| m.query_by_field(&collection, &field, &value))
    }

    fn list(&self, collection: &str) -> RemoteResult<Vec<KeyedDocument>> {
        let collection = collection.to_string();
        self.run(move |m| m.list(&collection))
    }

    fn delete(&self, collection: &str, key: &str) -> RemoteResult<()> {
        let (collection, key) = (collection.to_string(), key.to_string());
        self.run(move |m| m.delete(&collection, &key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryMirror;

    #[test]
    fn fast_calls_pass_through() {
        let inner = Arc::new(MemoryMirror::new());
        let mirror = TimeoutMirror::new(Arc::clone(&inner), Duration::from_secs(5)).unwrap();

        assert!(mirror.is_available());
        mirror.put("users", "7", &Document::new()).unwrap();
        assert!(mirror.get("users", "7").unwrap().is_some());
        assert_eq!(inner.write_count(), 1);
    }

    #[test]
    fn slow_calls_time_out() {
        let inner = Arc::new(MemoryMirror::new());
        inner.set_latency(Some(Duration::from_millis(300)));
        let mirror = TimeoutMirror::new(Arc::clone(&inner), Duration::from_millis(20)).unwrap();

        assert_eq!(
            mirror.put("users", "7", &Document::new()),
            Err(RemoteError::Timeout)
        );
        assert!(!mirror.is_available());

        inner.set_latency(None);
        assert!(mirror.is_available());
    }

    #[test]
    fn inner_errors_are_preserved() {
        let inner = Arc::new(MemoryMirror::new());
        inner.fail_writes_for("users", "1");
        let mirror = TimeoutMirror::new(inner, Duration::from_secs(5)).unwrap();

        let err = mirror.put("users", "1", &Document::new()).unwrap_err();
        assert!(matches!(err, RemoteError::Network { .. }));
    }

    #[test]
    fn wraps_trait_objects() {
        let inner: Arc<dyn RemoteMirror> = Arc::new(MemoryMirror::new());
        let mirror = TimeoutMirror::new(inner, Duration::from_secs(5)).unwrap();
        assert!(mirror.list("users").unwrap().is_empty());
    }
}
