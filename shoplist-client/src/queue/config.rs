//! Configuration for the request queue.

use std::time::Duration;

/// Configuration for the request queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of calls executing at once
    pub max_concurrent: usize,

    /// Default per-call timeout, measured from the moment a call starts running
    pub timeout: Duration,

    /// How long a dedup key keeps absorbing duplicates after submission
    pub dedup_window: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 6,
            timeout: Duration::from_secs(10),
            dedup_window: Duration::from_secs(1),
        }
    }
}

impl QueueConfig {
    /// Config for foreground UI traffic: few parallel calls, fail fast
    pub fn interactive() -> Self {
        Self {
            max_concurrent: 4,
            timeout: Duration::from_secs(5),
            dedup_window: Duration::from_millis(500),
        }
    }

    /// Config for background sync: wider fan-out, patient timeouts
    pub fn background() -> Self {
        Self {
            max_concurrent: 10,
            timeout: Duration::from_secs(30),
            dedup_window: Duration::from_secs(2),
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SHOPLIST_MAX_CONCURRENT") {
            if let Ok(n) = val.parse::<usize>() {
                config.max_concurrent = n.max(1);
            }
        }

        if let Ok(val) = std::env::var("SHOPLIST_REQUEST_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                config.timeout = Duration::from_millis(n);
            }
        }

        if let Ok(val) = std::env::var("SHOPLIST_DEDUP_WINDOW_MS") {
            if let Ok(n) = val.parse() {
                config.dedup_window = Duration::from_millis(n);
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
        let config = QueueConfig::default();
        assert_eq!(config.max_concurrent, 6);
        assert_eq!(config.timeout, Duration::from_millis(10_000));
        assert_eq!(config.dedup_window, Duration::from_millis(1_000));
    }

    #[test]
    fn test_presets() {
        assert_eq!(QueueConfig::interactive().max_concurrent, 4);
        assert_eq!(QueueConfig::background().timeout, Duration::from_secs(30));
    }
}
