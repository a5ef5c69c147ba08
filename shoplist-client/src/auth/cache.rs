//! Short-lived credential cache with single-flight refresh.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::config::AuthConfig;
use super::metrics::{AuthMetrics, AuthStats};
use super::provider::{expiry_after, Session, SessionProvider};
use crate::error::ClientError;
use crate::metrics::prometheus as prom;

/// A bearer token and the instant it stops being served
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Build a credential from a session, capped by the session's own expiry
    fn from_session(session: Session, cache_duration: Duration, now: DateTime<Utc>) -> Self {
        let cached_until = expiry_after(now, cache_duration);
        let expires_at = match session.expires_at {
            Some(session_end) => session_end.min(cached_until),
            None => cached_until,
        };
        Self { token: session.access_token, expires_at }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

type RefreshHandle = Shared<BoxFuture<'static, Option<Credential>>>;

struct AuthState {
    credential: Option<Credential>,
    inflight: Option<RefreshHandle>,
    cache_duration: Duration,
}

struct AuthInner {
    provider: Arc<dyn SessionProvider>,
    state: Mutex<AuthState>,
    metrics: AuthMetrics,
}

/// Memoizes the current credential and refreshes it at most once at a time
///
/// Cloning yields another handle to the same cache.
#[derive(Clone)]
pub struct AuthTokenCache {
    inner: Arc<AuthInner>,
}

impl AuthTokenCache {
    pub fn new(provider: Arc<dyn SessionProvider>, config: AuthConfig) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                provider,
                state: Mutex::new(AuthState {
                    credential: None,
                    inflight: None,
                    cache_duration: config.cache_duration,
                }),
                metrics: AuthMetrics::new(),
            }),
        }
    }

    /// The cached credential if still valid, otherwise the result of a refresh
    pub async fn get_credential(&self) -> Option<Credential> {
        if let Some(credential) = self.cached() {
            self.inner.metrics.record_hit();
            return Some(credential);
        }
        self.inner.metrics.record_miss();
        self.refresh().await
    }

    /// Ask the provider for a fresh credential, or join the refresh in flight
    ///
    /// Provider errors and missing sessions clear the cache and yield `None`.
    pub async fn refresh(&self) -> Option<Credential> {
        let handle = {
            let mut state = self.inner.state.lock();
            match &state.inflight {
                Some(handle) => {
                    self.inner.metrics.record_joined();
                    handle.clone()
                }
                None => {
                    let handle = start_refresh(Arc::clone(&self.inner));
                    state.inflight = Some(handle.clone());
                    handle
                }
            }
        };
        handle.await
    }

    /// Drop the cached credential
    ///
    /// A refresh already in flight is not cancelled: it keeps its
    /// single-flight slot and stores its result when it completes.
    pub fn invalidate(&self) {
        let mut state = self.inner.state.lock();
        state.credential = None;
        self.inner.metrics.record_invalidation();
        debug!(refresh_in_flight = state.inflight.is_some(), "Auth cache invalidated");
    }

    /// Lifetime applied to credentials cached from now on
    pub fn set_cache_duration(&self, duration: Duration) {
        self.inner.state.lock().cache_duration = duration;
    }

    pub fn cache_duration(&self) -> Duration {
        self.inner.state.lock().cache_duration
    }

    /// Peek at the cached credential without refreshing
    pub fn cached(&self) -> Option<Credential> {
        let state = self.inner.state.lock();
        state.credential.as_ref().filter(|c| c.is_valid()).cloned()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.state.lock().inflight.is_some()
    }

    /// Request headers carrying the current bearer token
    ///
    /// Fails with [`ClientError::Unauthenticated`] when no credential is available.
    pub async fn get_auth_headers(&self) -> Result<HeaderMap, ClientError> {
        let credential = self
            .get_credential()
            .await
            .ok_or(ClientError::Unauthenticated)?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential.token))
            .map_err(|e| ClientError::InvalidRequest(format!("bearer token: {}", e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }

    pub fn stats(&self) -> AuthStats {
        self.inner.metrics.snapshot()
    }
}

/// Spawn the provider call; the returned handle is shared by every waiter
///
/// The caller must hold the state lock and store the handle as `inflight`.
fn start_refresh(inner: Arc<AuthInner>) -> RefreshHandle {
    inner.metrics.record_refresh();
    let task = tokio::spawn(async move {
        let outcome = AssertUnwindSafe(inner.provider.current_session())
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ClientError::Session("session provider panicked".into())));
        let now = Utc::now();

        let mut state = inner.state.lock();
        state.inflight = None;

        let credential = match outcome {
            Ok(Some(session)) => {
                let credential = Credential::from_session(session, state.cache_duration, now);
                if credential.is_valid_at(now) {
                    prom::record_auth_refresh("success");
                    debug!(expires_at = %credential.expires_at, "Credential refreshed");
                    Some(credential)
                } else {
                    inner.metrics.record_no_session();
                    prom::record_auth_refresh("expired");
                    warn!("Session provider returned an expired session");
                    None
                }
            }
            Ok(None) => {
                inner.metrics.record_no_session();
                prom::record_auth_refresh("no_session");
                debug!("No session available");
                None
            }
            Err(e) => {
                inner.metrics.record_failure();
                prom::record_auth_refresh("error");
                warn!(error = %e, "Credential refresh failed");
                None
            }
        };

        state.credential = credential.clone();
        credential
    });

    async move { task.await.unwrap_or(None) }.boxed().shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts provider calls and answers after a delay
    struct CountingProvider {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingProvider {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), delay, fail: false })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { calls: AtomicUsize::new(0), delay: Duration::ZERO, fail: true })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SessionProvider for CountingProvider {
        async fn current_session(&self) -> Result<Option<Session>, ClientError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ClientError::Session("provider down".into()));
            }
            Ok(Some(Session::new(format!("token-{n}"))))
        }
    }

    fn cache_with(provider: Arc<CountingProvider>, cache_duration: Duration) -> AuthTokenCache {
        AuthTokenCache::new(provider, AuthConfig { cache_duration })
    }

    #[tokio::test]
    async fn test_round_trip() {
        let provider = CountingProvider::new(Duration::ZERO);
        let cache = cache_with(provider.clone(), Duration::from_secs(60));

        let first = cache.get_credential().await.unwrap();
        let second = cache.get_credential().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.token, "token-1");
        assert_eq!(provider.calls(), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_expired_credential_triggers_refresh() {
        let provider = CountingProvider::new(Duration::ZERO);
        let cache = cache_with(provider.clone(), Duration::from_millis(100));

        assert_eq!(cache.get_credential().await.unwrap().token, "token-1");
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(cache.cached().is_none());
        assert_eq!(cache.get_credential().await.unwrap().token, "token-2");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_single_flight() {
        let provider = CountingProvider::new(Duration::from_millis(30));
        let cache = cache_with(provider.clone(), Duration::from_secs(60));

        let lookups = (0..10).map(|_| cache.get_credential());
        let results = join_all(lookups).await;

        assert_eq!(provider.calls(), 1);
        assert!(results.iter().all(|r| r.as_ref().map(|c| c.token.as_str()) == Some("token-1")));
        assert!(!cache.is_refreshing());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_calls_share_outcome() {
        let provider = CountingProvider::new(Duration::from_millis(20));
        let cache = cache_with(provider.clone(), Duration::from_secs(60));

        let (a, b, c) = tokio::join!(cache.refresh(), cache.refresh(), cache.refresh());
        assert_eq!(provider.calls(), 1);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(cache.stats().joined, 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_clears_cache() {
        let provider = CountingProvider::failing();
        let cache = cache_with(provider.clone(), Duration::from_secs(60));

        let (a, b) = tokio::join!(cache.get_credential(), cache.get_credential());
        assert!(a.is_none());
        assert!(b.is_none());
        assert_eq!(provider.calls(), 1);
        assert!(cache.cached().is_none());
        assert_eq!(cache.stats().failures, 1);

        assert_eq!(cache.get_auth_headers().await, Err(ClientError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_invalidate_forces_new_refresh() {
        let provider = CountingProvider::new(Duration::ZERO);
        let cache = cache_with(provider.clone(), Duration::from_secs(60));

        cache.get_credential().await;
        cache.invalidate();
        assert!(cache.cached().is_none());

        assert_eq!(cache.get_credential().await.unwrap().token, "token-2");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_during_refresh_keeps_single_flight() {
        let provider = CountingProvider::new(Duration::from_millis(30));
        let cache = cache_with(provider.clone(), Duration::from_secs(60));

        let pending = tokio::spawn({
            let cache = cache.clone();
            async move { cache.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.is_refreshing());

        cache.invalidate();
        let joined = cache.get_credential().await;
        let first = pending.await.unwrap();

        assert_eq!(provider.calls(), 1);
        assert_eq!(joined, first);
        // The in-flight result is stored once it lands.
        assert_eq!(cache.cached(), first);
    }

    #[tokio::test]
    async fn test_set_cache_duration() {
        let provider = CountingProvider::new(Duration::ZERO);
        let cache = cache_with(provider.clone(), Duration::from_secs(60));
        cache.set_cache_duration(Duration::from_millis(50));
        assert_eq!(cache.cache_duration(), Duration::from_millis(50));

        cache.get_credential().await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        cache.get_credential().await;
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_recovers_after_provider_panic() {
        struct FlakyProvider {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl SessionProvider for FlakyProvider {
            async fn current_session(&self) -> Result<Option<Session>, ClientError> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("session store unavailable");
                }
                Ok(Some(Session::new("good")))
            }
        }

        let provider = Arc::new(FlakyProvider { calls: AtomicUsize::new(0) });
        let cache = AuthTokenCache::new(provider.clone(), AuthConfig::default());

        assert!(cache.get_credential().await.is_none());
        assert!(!cache.is_refreshing());
        assert_eq!(cache.stats().failures, 1);

        let second = cache.get_credential().await.unwrap();
        assert_eq!(second.token, "good");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert!(cache.get_auth_headers().await.is_ok());
    }

    #[test]
    fn test_credential_capped_by_session_expiry() {
        let now = Utc::now();
        let session_end = now + chrono::Duration::seconds(10);
        let session = Session::new("t").expiring_at(session_end);

        let credential = Credential::from_session(session, Duration::from_secs(300), now);
        assert_eq!(credential.expires_at, session_end);

        let credential = Credential::from_session(Session::new("t"), Duration::from_secs(1), now);
        assert!(credential.is_valid_at(now));
        assert!(!credential.is_valid_at(now + chrono::Duration::seconds(1)));
    }

    #[tokio::test]
    async fn test_expired_session_is_not_served() {
        struct StaleProvider;

        #[async_trait]
        impl SessionProvider for StaleProvider {
            async fn current_session(&self) -> Result<Option<Session>, ClientError> {
                let past = Utc::now() - chrono::Duration::seconds(5);
                Ok(Some(Session::new("old").expiring_at(past)))
            }
        }

        let cache = AuthTokenCache::new(Arc::new(StaleProvider), AuthConfig::default());
        assert!(cache.get_credential().await.is_none());
        assert_eq!(cache.stats().no_session, 1);
    }

    #[tokio::test]
    async fn test_auth_headers() {
        let provider = CountingProvider::new(Duration::from_millis(30));
        let cache = cache_with(provider.clone(), Duration::from_secs(60));

        let results = join_all((0..10).map(|_| cache.get_auth_headers())).await;
        assert_eq!(provider.calls(), 1);

        let first = results[0].as_ref().unwrap();
        assert_eq!(first.get(AUTHORIZATION).unwrap(), "Bearer token-1");
        assert_eq!(first.get(CONTENT_TYPE).unwrap(), "application/json");
        assert!(results.iter().all(|r| r.as_ref() == Ok(first)));
    }
}
