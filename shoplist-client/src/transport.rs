//! Transport layer for talking to the shopping-list API.
//!
//! [`Transport`] is the seam between the request queue and the network.
//! Responses are fully buffered into [`ApiResponse`], whose body is a
//! reference-counted [`Bytes`]: every clone reads the same body
//! independently, which is what deduplicated waiters receive.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::ClientError;

/// An outbound API call
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the transport's base URL, or an absolute URL
    pub url: String,
    /// Lower-cased header names; ordered so dedup keys are stable
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self { method, url: url.into(), headers: BTreeMap::new(), body: None }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Merge a header map, e.g. the one from `AuthTokenCache::get_auth_headers`
    pub fn with_headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            self.headers.insert(name.as_str().to_string(), value);
        }
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ClientError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// GET and HEAD are the only calls treated as side-effect free
    pub fn is_read_only(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    /// Key under which identical reads are collapsed
    ///
    /// Method, URL and headers; `None` for mutating methods, which must
    /// never be deduplicated.
    pub fn dedup_key(&self) -> Option<String> {
        if !self.is_read_only() {
            return None;
        }
        let headers = serde_json::to_string(&self.headers).unwrap_or_default();
        Some(format!("{}_{}_{}", self.method, self.url, headers))
    }
}

/// A buffered API response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: u16,
    headers: HeaderMap,
    body: Bytes,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self { status, headers: HeaderMap::new(), body: body.into() }
    }

    /// Convenience for building JSON responses in transports and tests
    pub fn json_body<B: Serialize + ?Sized>(status: u16, body: &B) -> Result<Self, ClientError> {
        let bytes = serde_json::to_vec(body)?;
        Ok(Self::new(status, bytes)
            .with_header("content-type", "application/json"))
    }

    /// Add a header; invalid names or values are ignored
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) =
            (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value))
        {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Whether the status is 2xx
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> Result<String, ClientError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Decode the body as JSON; an empty body decodes as `null`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        if self.body.is_empty() {
            return Ok(serde_json::from_slice(b"null")?);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Turn a non-2xx response into [`ClientError::Http`]
    pub fn error_for_status(self) -> Result<Self, ClientError> {
        if self.ok() {
            return Ok(self);
        }
        let body = String::from_utf8_lossy(&self.body).into_owned();
        Err(ClientError::Http { status: self.status, body })
    }
}

/// Sends a single request and buffers the response
///
/// Non-2xx statuses are returned as responses; only network-level failures
/// are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError>;
}

/// reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
    /// HTTP client
    client: Client,
    /// API base URL
    base_url: String,
}

impl HttpTransport {
    /// Create a new transport for the given API base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(url = %base_url, "Creating HTTP transport");

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client, base_url })
    }

    /// Get the API base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a request path
    pub fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let url = self.resolve(&request.url);
        debug!(url = %url, "Sending request");

        let mut builder = self.client.request(request.method, &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        debug!(status, bytes = body.len(), "Response received");
        Ok(ApiResponse { status, headers, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::AUTHORIZATION;
    use serde_json::json;

    #[test]
    fn test_dedup_key_for_reads_only() {
        let get = ApiRequest::get("/api/categories");
        assert_eq!(get.dedup_key().as_deref(), Some("GET_/api/categories_{}"));

        assert!(ApiRequest::post("/api/categories").dedup_key().is_none());
        assert!(ApiRequest::delete("/api/items/1").dedup_key().is_none());
        assert!(ApiRequest::patch("/api/items/1").dedup_key().is_none());
    }

    #[test]
    fn test_dedup_key_includes_headers() {
        let a = ApiRequest::get("/api/items").header("Authorization", "Bearer a");
        let b = ApiRequest::get("/api/items").header("authorization", "Bearer b");
        let a2 = ApiRequest::get("/api/items").header("authorization", "Bearer a");

        assert_ne!(a.dedup_key(), b.dedup_key());
        assert_eq!(a.dedup_key(), a2.dedup_key());
    }

    #[test]
    fn test_with_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        let request = ApiRequest::get("/api/items").with_headers(&headers);
        assert_eq!(request.headers.get("authorization").unwrap(), "Bearer t");
    }

    #[test]
    fn test_response_clones_read_independently() {
        let response = ApiResponse::json_body(200, &json!({"name": "Dairy"})).unwrap();
        let copy = response.clone();

        let a: serde_json::Value = response.json().unwrap();
        let b: serde_json::Value = copy.json().unwrap();
        assert_eq!(a, b);
        assert_eq!(response.text().unwrap(), r#"{"name":"Dairy"}"#);
    }

    #[test]
    fn test_error_for_status() {
        let response = ApiResponse::new(404, "not found");
        assert!(!response.ok());
        assert_eq!(
            response.error_for_status().unwrap_err(),
            ClientError::Http { status: 404, body: "not found".into() }
        );
        assert!(ApiResponse::new(204, "").error_for_status().is_ok());
    }

    #[test]
    fn test_empty_body_decodes_as_null() {
        let value: Option<serde_json::Value> = ApiResponse::new(204, "").json().unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_resolve() {
        let transport = HttpTransport::new("http://localhost:3000/").unwrap();
        assert_eq!(transport.base_url(), "http://localhost:3000");
        assert_eq!(transport.resolve("/api/items"), "http://localhost:3000/api/items");
        assert_eq!(transport.resolve("api/items"), "http://localhost:3000/api/items");
        assert_eq!(transport.resolve("https://other/x"), "https://other/x");
    }
}
