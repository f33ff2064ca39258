//! Realtime Database REST mirror.
//!
//! Maps the mirror contract onto the Firebase Realtime Database REST API:
//! `GET/PUT/PATCH/DELETE {base}/{collection}/{key}.json`, with field lookups
//! through `orderBy`/`equalTo` queries. The actual HTTP client is abstracted
//! via a trait so any blocking client (reqwest, ureq, a loopback for tests)
//! can carry the requests.

use crate::error::{RemoteError, RemoteResult};
use crate::mirror::{check_key, KeyedDocument, RemoteMirror};
use lalantsika_model::Document;
use serde_json::Value;
use std::time::Duration;

/// HTTP verbs used by the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Read.
    Get,
    /// Overwrite.
    Put,
    /// Merge.
    Patch,
    /// Remove.
    Delete,
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Verb.
    pub method: HttpMethod,
    /// Absolute URL including query string.
    pub url: String,
    /// JSON body, if any.
    pub body: Option<Vec<u8>>,
    /// Deadline for the whole exchange.
    pub timeout: Duration,
}

/// A received response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Raw body.
    pub body: Vec<u8>,
}

/// Transport-level failure reported by an [`HttpClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum HttpFailure {
    /// The request did not complete in time.
    Timeout,
    /// Connection could not be established or was lost.
    Connection(String),
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the response, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns an [`HttpFailure`] if no response was received.
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpFailure>;
}

/// Mirror backed by the Realtime Database REST API.
pub struct RestMirror<C: HttpClient> {
    /// Database URL, e.g. `https://project-default-rtdb.firebaseio.com`.
    base_url: String,
    /// Database secret or ID token appended as `auth=`.
    auth_token: Option<String>,
    /// Path touched by the availability probe.
    probe_path: String,
    /// Per-request deadline.
    timeout: Duration,
    client: C,
}

impl<C: HttpClient> RestMirror<C> {
    /// Creates a mirror for the database at `base_url`.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: None,
            probe_path: "_health".into(),
            timeout: Duration::from_secs(10),
            client,
        }
    }

    /// Sets the auth token.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Sets the probe sentinel path.
    pub fn with_probe_path(mut self, path: impl Into<String>) -> Self {
        self.probe_path = path.into();
        self
    }

    /// Sets the per-request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> String {
        let mut url = format!("{}/{}.json", self.base_url, path);
        let mut params: Vec<String> = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();
        if let Some(token) = &self.auth_token {
            params.push(format!("auth={}", urlencoding::encode(token)));
        }
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }

    fn send(&self, method: HttpMethod, url: String, body: Option<&Value>) -> RemoteResult<Value> {
        let body = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| RemoteError::InvalidResponse(format!("failed to encode body: {e}")))?;

        let request = HttpRequest {
            method,
            url,
            body,
            timeout: self.timeout,
        };

        let response = self.client.send(&request).map_err(|failure| match failure {
            HttpFailure::Timeout => RemoteError::Timeout,
            HttpFailure::Connection(message) => RemoteError::network(message),
        })?;

        if !(200..300).contains(&response.status) {
            let message = String::from_utf8_lossy(&response.body).into_owned();
            return Err(RemoteError::from_status(response.status, message));
        }

        if response.body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&response.body)
            .map_err(|e| RemoteError::InvalidResponse(format!("failed to decode response: {e}")))
    }

    fn document_path(collection: &str, key: &str) -> RemoteResult<String> {
        check_key(collection)?;
        check_key(key)?;
        Ok(format!("{collection}/{key}"))
    }

    fn keyed_documents(value: Value) -> RemoteResult<Vec<KeyedDocument>> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Object(map) => {
                let mut docs: Vec<KeyedDocument> = map
                    .into_iter()
                    .filter_map(|(key, doc)| match doc {
                        Value::Object(doc) => Some((key, doc)),
                        _ => None,
                    })
                    .collect();
                docs.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(docs)
            }
            other => Err(RemoteError::InvalidResponse(format!(
                "expected an object of documents, got {other}"
            ))),
        }
    }
}

impl<C: HttpClient> RemoteMirror for RestMirror<C> {
    fn is_available(&self) -> bool {
        let stamp = serde_json::json!({ "checked_at": chrono::Utc::now().to_rfc3339() });
        let url = self.url(&self.probe_path, &[]);
        match self.send(HttpMethod::Put, url, Some(&stamp)) {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(error = %err, "mirror probe failed");
                false
            }
        }
    }

    fn put(&self, collection: &str, key: &str, document: &Document) -> RemoteResult<()> {
        let url = self.url(&Self::document_path(collection, key)?, &[]);
        self.send(HttpMethod::Put, url, Some(&Value::Object(document.clone())))?;
        Ok(())
    }

    fn patch(&self, collection: &str, key: &str, partial: &Document) -> RemoteResult<()> {
        let url = self.url(&Self::document_path(collection, key)?, &[]);
        self.send(HttpMethod::Patch, url, Some(&Value::Object(partial.clone())))?;
        Ok(())
    }

    fn get(&self, collection: &str, key: &str) -> RemoteResult<Option<Document>> {
        let url = self.url(&Self::document_path(collection, key)?, &[]);
        match self.send(HttpMethod::Get, url, None)? {
            Value::Null => Ok(None),
            Value::Object(doc) => Ok(Some(doc)),
            other => Err(RemoteError::InvalidResponse(format!(
                "expected a document, got {other}"
            ))),
        }
    }

    fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> RemoteResult<Vec<KeyedDocument>> {
        check_key(collection)?;
        let query = [
            ("orderBy", Value::String(field.to_string()).to_string()),
            ("equalTo", value.to_string()),
        ];
        let url = self.url(collection, &query);
        Self::keyed_documents(self.send(HttpMethod::Get, url, None)?)
    }

    fn list(&self, collection: &str) -> RemoteResult<Vec<KeyedDocument>> {
        check_key(collection)?;
        let url = self.url(collection, &[]);
        Self::keyed_documents(self.send(HttpMethod::Get, url, None)?)
    }

    fn delete(&self, collection: &str, key: &str) -> RemoteResult<()> {
        let url = self.url(&Self::document_path(collection, key)?, &[]);
        self.send(HttpMethod::Delete, url, None)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Records requests and answers from a canned queue.
    struct TestClient {
        requests: Mutex<Vec<HttpRequest>>,
        responses: Mutex<Vec<Result<HttpResponse, HttpFailure>>>,
    }

    impl TestClient {
        fn new() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                responses: Mutex::new(Vec::new()),
            }
        }

        fn respond(&self, status: u16, body: Value) {
            self.responses.lock().push(Ok(HttpResponse {
                status,
                body: serde_json::to_vec(&body).unwrap(),
            }));
        }

        fn fail(&self, failure: HttpFailure) {
            self.responses.lock().push(Err(failure));
        }

        fn last_request(&self) -> HttpRequest {
            self.requests.lock().last().cloned().unwrap()
        }
    }

    impl HttpClient for TestClient {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpFailure> {
            self.requests.lock().push(request.clone());
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                return Err(HttpFailure::Connection("no response queued".into()));
            }
            responses.remove(0)
        }
    }

    fn mirror() -> RestMirror<TestClient> {
        RestMirror::new("https://lalantsika.firebaseio.com/", TestClient::new())
    }

    #[test]
    fn put_targets_document_url() {
        let mirror = mirror();
        mirror.client.respond(200, json!({"email": "a@b.com"}));

        let doc = json!({"email": "a@b.com"}).as_object().cloned().unwrap();
        mirror.put("users", "7", &doc).unwrap();

        let request = mirror.client.last_request();
        assert_eq!(request.method, HttpMethod::Put);
        assert_eq!(request.url, "https://lalantsika.firebaseio.com/users/7.json");
        assert_eq!(
            serde_json::from_slice::<Value>(&request.body.unwrap()).unwrap(),
            json!({"email": "a@b.com"})
        );
    }

    #[test]
    fn get_null_is_absent() {
        let mirror = mirror();
        mirror.client.respond(200, Value::Null);
        assert!(mirror.get("users", "404").unwrap().is_none());
    }

    #[test]
    fn query_encodes_order_by_and_equal_to() {
        let mirror = mirror().with_auth_token("s3cr3t");
        mirror.client.respond(
            200,
            json!({"-Nb": {"synchronized": false}, "-Na": {"synchronized": false}}),
        );

        let docs = mirror
            .query_by_field("signalements", "synchronized", &json!(false))
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].0, "-Na");

        let url = mirror.client.last_request().url;
        assert_eq!(
            url,
            "https://lalantsika.firebaseio.com/signalements.json?orderBy=%22synchronized%22&equalTo=false&auth=s3cr3t"
        );
    }

    #[test]
    fn status_codes_map_to_taxonomy() {
        let mirror = mirror();
        mirror.client.respond(401, json!({"error": "Permission denied"}));
        assert!(matches!(
            mirror.delete("users", "1"),
            Err(RemoteError::Auth(_))
        ));

        mirror.client.respond(503, json!({"error": "busy"}));
        let err = mirror.patch("users", "1", &Document::new()).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn transport_failures_map_to_taxonomy() {
        let mirror = mirror();
        mirror.client.fail(HttpFailure::Timeout);
        assert_eq!(mirror.get("users", "1").unwrap_err(), RemoteError::Timeout);

        mirror.client.fail(HttpFailure::Connection("dns".into()));
        assert!(matches!(
            mirror.list("users"),
            Err(RemoteError::Network { .. })
        ));
    }

    #[test]
    fn probe_never_fails() {
        let mirror = mirror().with_probe_path("_ping");
        mirror.client.fail(HttpFailure::Connection("offline".into()));
        assert!(!mirror.is_available());

        mirror.client.respond(200, json!({"checked_at": "now"}));
        assert!(mirror.is_available());
        assert!(mirror.client.last_request().url.ends_with("/_ping.json"));
    }

    #[test]
    fn bad_keys_are_rejected_before_sending() {
        let mirror = mirror();
        assert!(matches!(
            mirror.put("users", "../x", &Document::new()),
            Err(RemoteError::InvalidKey(_))
        ));
        assert!(mirror.client.requests.lock().is_empty());
    }
}
