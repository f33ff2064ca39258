//! Blocking reqwest transport for the REST mirror.

use lalantsika_mirror::{HttpClient, HttpFailure, HttpMethod, HttpRequest, HttpResponse};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;

/// [`HttpClient`] over `reqwest::blocking`.
///
/// Create it outside any async runtime; reqwest's blocking client owns a
/// runtime of its own.
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    /// Builds the client.
    pub fn new() -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("lalantsika/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpFailure> {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = builder.send().map_err(failure)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(failure)?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

fn failure(err: reqwest::Error) -> HttpFailure {
    if err.is_timeout() {
        HttpFailure::Timeout
    } else {
        HttpFailure::Connection(err.to_string())
    }
}
