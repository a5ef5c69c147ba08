//! Metrics module for the shoplist client
//!
//! Provides Prometheus metrics for monitoring and observability.

pub mod prometheus;

// Re-export commonly used items
pub use prometheus::{
    add_active_calls, add_pending_calls, encode_metrics, record_auth_refresh, record_call,
    record_dedup_hit, record_queue_wait, register_metrics, set_max_concurrent, ACTIVE_CALLS,
    AUTH_REFRESH_TOTAL, CALLS_TOTAL, DEDUP_HITS_TOTAL, PENDING_CALLS,
};
