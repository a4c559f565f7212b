//! HTTP collaborator
//!
//! The engine only needs "GET a URL, hand back status, headers and body".
//! [`HttpClient`] is that seam; [`ReqwestClient`] is the production
//! implementation and tests plug in scripted clients.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::config::RunSettings;
use crate::error::Result;

/// Response as seen by the classifier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are stored lowercase
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Issues GET requests against the service under test
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse>;
}

/// reqwest-backed client
pub struct ReqwestClient {
    inner: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(settings: &RunSettings) -> Result<Self> {
        Self::with_options(settings.request_timeout(), settings.insecure_skip_tls_verify)
    }

    pub fn with_options(timeout: Duration, insecure_skip_tls_verify: bool) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure_skip_tls_verify)
            .build()?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        let response = self.inner.get(url).send().await?;
        let status = response.status().as_u16();

        let headers = collect_headers(response.headers());

        let body = response.bytes().await?;
        debug!(url, status, bytes = body.len(), "GET completed");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Lower-cased header map; a repeated header keeps its first value
fn collect_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    let mut collected = HashMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            collected
                .entry(name.as_str().to_ascii_lowercase())
                .or_insert_with(|| value.to_string());
        }
    }
    collected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = HttpResponse::new(200).with_header("Content-Type", "application/pdf");
        assert_eq!(response.header("content-type"), Some("application/pdf"));
        assert_eq!(response.header("CONTENT-TYPE"), Some("application/pdf"));
        assert_eq!(response.header("x-missing"), None);
    }

    #[test]
    fn test_repeated_header_keeps_first_value() {
        use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

        let mut headers = HeaderMap::new();
        headers.append(CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
        headers.append(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        headers.append("X-Request-Id", HeaderValue::from_static("abc"));

        let collected = collect_headers(&headers);
        assert_eq!(collected.len(), 2);
        assert_eq!(collected["content-type"], "application/pdf");
        assert_eq!(collected["x-request-id"], "abc");
    }

    #[test]
    fn test_client_builds_from_settings() {
        assert!(ReqwestClient::new(&RunSettings::default()).is_ok());
    }
}
