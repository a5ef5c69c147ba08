//! Configuration for the auth token cache.

use std::time::Duration;

/// Configuration for the auth token cache
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// How long a fetched credential is served before the provider is asked again
    pub cache_duration: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cache_duration: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl AuthConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SHOPLIST_AUTH_CACHE_SECS") {
            if let Ok(n) = val.parse() {
                config.cache_duration = Duration::from_secs(n);
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AuthConfig::default();
        assert_eq!(config.cache_duration, Duration::from_secs(5 * 60));
    }
}
