//! Queued, deduplicated and authenticated API calls.
//!
//! [`ApiClient`] is the one coordination point the application builds at
//! startup and hands to everything that talks to the API.

use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::auth::AuthTokenCache;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::queue::{CallOptions, QueueConfig, RequestQueue};
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};

/// API client routing every call through one queue and one auth cache
///
/// Cloning yields another handle to the same queue and cache.
#[derive(Clone)]
pub struct ApiClient {
    queue: RequestQueue<ApiResponse>,
    auth: AuthTokenCache,
    transport: Arc<dyn Transport>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, auth: AuthTokenCache, queue: QueueConfig) -> Self {
        Self { queue: RequestQueue::new(queue), auth, transport }
    }

    /// Build the HTTP transport, session provider, cache and queue from config
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(config.api_url.clone())?;
        let auth = AuthTokenCache::new(config.session_provider()?, config.auth.clone());

        info!(
            api_url = %transport.base_url(),
            max_concurrent = config.queue.max_concurrent,
            timeout_ms = config.queue.timeout.as_millis() as u64,
            "API client ready"
        );

        Ok(Self::new(Arc::new(transport), auth, config.queue.clone()))
    }

    pub fn queue(&self) -> &RequestQueue<ApiResponse> {
        &self.queue
    }

    pub fn auth(&self) -> &AuthTokenCache {
        &self.auth
    }

    /// Send a request through the queue without auth headers
    ///
    /// Reads are deduplicated on method, URL and headers.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn fetch(
        &self,
        request: ApiRequest,
        priority: i32,
    ) -> Result<ApiResponse, ClientError> {
        let mut options = CallOptions::priority(priority);
        options.dedup_key = request.dedup_key();

        let id = format!("{}-{}", request.method, uuid::Uuid::new_v4());
        let transport = Arc::clone(&self.transport);

        let handle = self
            .queue
            .submit_with(id, async move { transport.send(request).await }, options);
        if handle.is_deduplicated() {
            debug!(id = %handle.id(), "Served by in-flight request");
        }
        handle.await
    }

    /// Send a request with the cached bearer token attached
    pub async fn authed_fetch(
        &self,
        request: ApiRequest,
        priority: i32,
    ) -> Result<ApiResponse, ClientError> {
        let headers = self.auth.get_auth_headers().await?;
        self.fetch(request.with_headers(&headers), priority).await
    }

    /// Authenticated GET decoding a JSON body; non-2xx becomes [`ClientError::Http`]
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.authed_fetch(ApiRequest::get(path), 0)
            .await?
            .error_for_status()?
            .json()
    }

    /// Authenticated call with a JSON body, decoding a JSON reply
    pub async fn send_json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = ApiRequest::new(method, path).json(body)?;
        self.authed_fetch(request, 0)
            .await?
            .error_for_status()?
            .json()
    }

    /// Forget the credential and drop every call that has not started
    ///
    /// Returns the number of pending calls rejected.
    pub fn sign_out(&self) -> usize {
        self.auth.invalidate();
        let cleared = self.queue.clear();
        info!(cleared, "Signed out");
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AnonymousSessionProvider, AuthConfig, StaticSessionProvider};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    /// Records requests and echoes method, URL and auth header back
    #[derive(Default)]
    struct EchoTransport {
        seen: Mutex<Vec<ApiRequest>>,
    }

    #[async_trait]
    impl Transport for EchoTransport {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
            self.seen.lock().push(request.clone());
            let status = if request.url.ends_with("/missing") { 404 } else { 200 };
            ApiResponse::json_body(
                status,
                &json!({
                    "method": request.method.as_str(),
                    "url": request.url,
                    "auth": request.headers.get("authorization"),
                    "body": request.body,
                }),
            )
        }
    }

    fn client(token: Option<&str>) -> (ApiClient, Arc<EchoTransport>) {
        let transport = Arc::new(EchoTransport::default());
        let provider: Arc<dyn crate::auth::SessionProvider> = match token {
            Some(t) => Arc::new(StaticSessionProvider::new(t)),
            None => Arc::new(AnonymousSessionProvider),
        };
        let auth = AuthTokenCache::new(provider, AuthConfig::default());
        let client = ApiClient::new(transport.clone(), auth, QueueConfig::default());
        (client, transport)
    }

    #[tokio::test]
    async fn test_get_json_attaches_bearer() {
        let (client, transport) = client(Some("secret"));
        let body: Value = client.get_json("/api/categories").await.unwrap();

        assert_eq!(body["auth"], "Bearer secret");
        assert_eq!(body["method"], "GET");
        let seen = transport.seen.lock();
        assert_eq!(seen[0].headers.get("content-type").unwrap(), "application/json");
    }

    #[tokio::test]
    async fn test_send_json_posts_body() {
        let (client, _) = client(Some("secret"));
        let body: Value = client
            .send_json(Method::POST, "/api/items", &json!({"name": "Milk"}))
            .await
            .unwrap();
        assert_eq!(body["method"], "POST");
        assert_eq!(body["body"]["name"], "Milk");
    }

    #[tokio::test]
    async fn test_unauthenticated_without_session() {
        let (client, transport) = client(None);
        let result: Result<Value, _> = client.get_json("/api/items").await;
        assert_eq!(result, Err(ClientError::Unauthenticated));
        assert!(transport.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_plain_fetch_needs_no_session() {
        let (client, _) = client(None);
        let response = client.fetch(ApiRequest::get("/api/health"), 0).await.unwrap();
        assert!(response.ok());
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let (client, _) = client(Some("secret"));
        let result: Result<Value, _> = client.get_json("/api/missing").await;
        assert!(matches!(result, Err(ClientError::Http { status: 404, .. })));
    }

    #[tokio::test]
    async fn test_sign_out_invalidates() {
        let (client, _) = client(Some("secret"));
        client.auth().get_credential().await;
        assert!(client.auth().cached().is_some());

        assert_eq!(client.sign_out(), 0);
        assert!(client.auth().cached().is_none());
    }
}
