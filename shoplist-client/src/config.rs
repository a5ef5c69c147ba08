//! Top-level client configuration.

use std::sync::Arc;

use crate::auth::{
    AnonymousSessionProvider, AuthConfig, HttpSessionProvider, SessionProvider,
    StaticSessionProvider,
};
use crate::error::ClientError;
use crate::queue::QueueConfig;

/// Everything needed to build an [`ApiClient`](crate::ApiClient)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API base URL
    pub api_url: String,

    /// Session endpoint for [`HttpSessionProvider`]
    pub session_url: Option<String>,

    /// `apikey` header sent to the session endpoint
    pub session_api_key: Option<String>,

    /// Fixed bearer token; takes precedence over `session_url`
    pub access_token: Option<String>,

    pub queue: QueueConfig,

    pub auth: AuthConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000".to_string(),
            session_url: None,
            session_api_key: None,
            access_token: None,
            queue: QueueConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("SHOPLIST_API_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            session_url: std::env::var("SHOPLIST_SESSION_URL").ok(),
            session_api_key: std::env::var("SHOPLIST_SESSION_API_KEY").ok(),
            access_token: std::env::var("SHOPLIST_ACCESS_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            queue: QueueConfig::from_env(),
            auth: AuthConfig::from_env(),
        }
    }

    /// Pick the session provider this configuration describes
    pub fn session_provider(&self) -> Result<Arc<dyn SessionProvider>, ClientError> {
        if let Some(token) = &self.access_token {
            return Ok(Arc::new(StaticSessionProvider::new(token.clone())));
        }

        if let Some(url) = &self.session_url {
            let mut provider = HttpSessionProvider::new(url.clone())?;
            if let Some(key) = &self.session_api_key {
                provider = provider.with_api_key(key.clone());
            }
            return Ok(Arc::new(provider));
        }

        Ok(Arc::new(AnonymousSessionProvider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.api_url, "http://localhost:3000");
        assert!(config.access_token.is_none());
        assert_eq!(config.queue.max_concurrent, 6);
    }

    #[tokio::test]
    async fn test_static_token_wins() {
        let config = ClientConfig {
            access_token: Some("tok".into()),
            session_url: Some("http://localhost:9/session".into()),
            ..ClientConfig::default()
        };
        let provider = config.session_provider().unwrap();
        let session = provider.current_session().await.unwrap().unwrap();
        assert_eq!(session.access_token, "tok");
    }

    #[tokio::test]
    async fn test_anonymous_by_default() {
        let provider = ClientConfig::default().session_provider().unwrap();
        assert_eq!(provider.current_session().await, Ok(None));
    }
}
