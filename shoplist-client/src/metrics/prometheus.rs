//! Prometheus metrics for the shoplist client
//!
//! Process-wide counters and gauges shared by every queue and auth cache
//! instance, exposed in Prometheus text format.

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounter, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry for shoplist metrics
    pub static ref REGISTRY: Registry = Registry::new();

    // ============== Call Metrics ==============

    /// Finished calls by outcome (success, failure, timeout, cleared)
    pub static ref CALLS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("calls_total", "Total number of queued calls by outcome")
            .namespace("shoplist"),
        &["outcome"]
    ).expect("metric can be created");

    /// Execution time of calls that started running
    pub static ref CALL_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "call_duration_seconds",
            "Call execution time in seconds"
        )
        .namespace("shoplist")
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["outcome"]
    ).expect("metric can be created");

    /// Submissions absorbed by an in-flight execution
    pub static ref DEDUP_HITS_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("dedup_hits_total", "Total submissions served by an existing execution")
            .namespace("shoplist")
    ).expect("metric can be created");

    // ============== Queue Metrics ==============

    /// Pending calls gauge
    pub static ref PENDING_CALLS: Gauge = Gauge::with_opts(
        Opts::new("pending_calls", "Calls waiting for a concurrency slot")
            .namespace("shoplist")
    ).expect("metric can be created");

    /// Running calls gauge
    pub static ref ACTIVE_CALLS: Gauge = Gauge::with_opts(
        Opts::new("active_calls", "Calls currently executing")
            .namespace("shoplist")
    ).expect("metric can be created");

    /// Configured concurrency bound
    pub static ref MAX_CONCURRENT_CALLS: Gauge = Gauge::with_opts(
        Opts::new("max_concurrent_calls", "Maximum concurrent calls allowed")
            .namespace("shoplist")
    ).expect("metric can be created");

    /// Time from submission to start
    pub static ref QUEUE_WAIT_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "queue_wait_seconds",
            "Time spent pending before execution"
        )
        .namespace("shoplist")
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0])
    ).expect("metric can be created");

    // ============== Auth Metrics ==============

    /// Session refreshes by outcome (success, no_session, error)
    pub static ref AUTH_REFRESH_TOTAL: CounterVec = CounterVec::new(
        Opts::new("auth_refresh_total", "Total session provider calls by outcome")
            .namespace("shoplist"),
        &["outcome"]
    ).expect("metric can be created");
}

/// Register all metrics with the global registry.
/// Should be called once at startup.
pub fn register_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(CALLS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CALL_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(DEDUP_HITS_TOTAL.clone()))?;

    REGISTRY.register(Box::new(PENDING_CALLS.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_CALLS.clone()))?;
    REGISTRY.register(Box::new(MAX_CONCURRENT_CALLS.clone()))?;
    REGISTRY.register(Box::new(QUEUE_WAIT_SECONDS.clone()))?;

    REGISTRY.register(Box::new(AUTH_REFRESH_TOTAL.clone()))?;

    Ok(())
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# Error encoding metrics: {}", e))
}

/// Record a finished call.
pub fn record_call(outcome: &str, exec_secs: Option<f64>) {
    CALLS_TOTAL.with_label_values(&[outcome]).inc();
    if let Some(secs) = exec_secs {
        CALL_DURATION_SECONDS
            .with_label_values(&[outcome])
            .observe(secs);
    }
}

/// Record a deduplicated submission.
pub fn record_dedup_hit() {
    DEDUP_HITS_TOTAL.inc();
}

/// Record queue wait time.
pub fn record_queue_wait(wait_secs: f64) {
    QUEUE_WAIT_SECONDS.observe(wait_secs);
}

/// Shift the pending calls gauge. Gauges are shared by every queue in the
/// process, so queues report deltas rather than absolute values.
pub fn add_pending_calls(delta: i64) {
    PENDING_CALLS.add(delta as f64);
}

/// Shift the active calls gauge.
pub fn add_active_calls(delta: i64) {
    ACTIVE_CALLS.add(delta as f64);
}

/// Update the concurrency bound gauge.
pub fn set_max_concurrent(n: usize) {
    MAX_CONCURRENT_CALLS.set(n as f64);
}

/// Record a session provider call.
pub fn record_auth_refresh(outcome: &str) {
    AUTH_REFRESH_TOTAL.with_label_values(&[outcome]).inc();
}
