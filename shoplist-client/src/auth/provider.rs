//! Session providers: where bearer credentials come from.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::ClientError;

/// An authenticated session as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token
    pub access_token: String,
    /// When the session itself ends, if the provider says
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self { access_token: access_token.into(), expires_at: None }
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Source of the current session
///
/// `Ok(None)` means nobody is signed in; errors are provider failures.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn current_session(&self) -> Result<Option<Session>, ClientError>;
}

/// `now + duration`, saturating at the largest representable instant
pub(crate) fn expiry_after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Provider that always hands out the same token
#[derive(Debug, Clone)]
pub struct StaticSessionProvider {
    token: String,
    lifetime: Option<Duration>,
}

impl StaticSessionProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into(), lifetime: None }
    }

    /// Report each session as ending `lifetime` after it was handed out
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }
}

#[async_trait]
impl SessionProvider for StaticSessionProvider {
    async fn current_session(&self) -> Result<Option<Session>, ClientError> {
        let session = Session {
            access_token: self.token.clone(),
            expires_at: self.lifetime.map(|d| expiry_after(Utc::now(), d)),
        };
        Ok(Some(session))
    }
}

/// Provider for signed-out use: never has a session
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousSessionProvider;

#[async_trait]
impl SessionProvider for AnonymousSessionProvider {
    async fn current_session(&self) -> Result<Option<Session>, ClientError> {
        Ok(None)
    }
}

/// Provider that asks a session endpoint over HTTP
///
/// The endpoint answers `200` with a [`Session`] body when signed in and
/// `401`/`403`/`404` when not.
#[derive(Clone)]
pub struct HttpSessionProvider {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpSessionProvider {
    pub fn new(url: impl Into<String>) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self { client, url: url.into(), api_key: None })
    }

    /// Send `apikey: <key>` with every session lookup
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SessionProvider for HttpSessionProvider {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn current_session(&self) -> Result<Option<Session>, ClientError> {
        let mut request = self.client.get(&self.url);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Session(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let session: Session = response
                    .json()
                    .await
                    .map_err(|e| ClientError::Session(e.to_string()))?;
                debug!(expires_at = ?session.expires_at, "Session fetched");
                Ok(Some(session))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                debug!("No active session");
                Ok(None)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ClientError::Session(format!("status {}: {}", status, body)))
            }
        }
    }
}
