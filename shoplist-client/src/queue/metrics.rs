//! Metrics for the request queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Per-queue counters
#[derive(Debug, Default)]
pub struct QueueMetrics {
    /// Total submissions, deduplicated ones included
    pub submitted: AtomicU64,

    /// Submissions that attached to an existing execution
    pub deduplicated: AtomicU64,

    /// Calls currently pending
    pub pending: AtomicU64,

    /// Calls currently running
    pub running: AtomicU64,

    /// Calls that left the pending queue to run
    pub started: AtomicU64,

    /// Calls that resolved successfully
    pub completed: AtomicU64,

    /// Calls whose execute failed
    pub failed: AtomicU64,

    /// Calls that hit their timeout
    pub timed_out: AtomicU64,

    /// Pending calls rejected by `clear()`
    pub cleared: AtomicU64,

    /// Total pending wait in milliseconds (for averaging)
    pub total_wait_ms: AtomicU64,

    /// Total execution time in milliseconds (for averaging)
    pub total_exec_ms: AtomicU64,

    /// Highest pending depth observed
    pub max_pending: AtomicU64,

    /// Highest running count observed
    pub max_running: AtomicU64,
}

fn raise_max(slot: &AtomicU64, value: u64) {
    let mut current = slot.load(Ordering::Relaxed);
    while value > current {
        match slot.compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(x) => current = x,
        }
    }
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a call entering the pending queue
    pub fn record_queued(&self) {
        let pending = self.pending.fetch_add(1, Ordering::Relaxed) + 1;
        raise_max(&self.max_pending, pending);
    }

    /// Record a call leaving the pending queue to run
    pub fn record_started(&self, wait_time: Duration) {
        self.pending.fetch_sub(1, Ordering::Relaxed);
        let running = self.running.fetch_add(1, Ordering::Relaxed) + 1;
        raise_max(&self.max_running, running);
        self.started.fetch_add(1, Ordering::Relaxed);
        self.total_wait_ms
            .fetch_add(wait_time.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_completed(&self, exec_time: Duration) {
        self.finish(exec_time);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, exec_time: Duration) {
        self.finish(exec_time);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self, exec_time: Duration) {
        self.finish(exec_time);
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self, exec_time: Duration) {
        self.running.fetch_sub(1, Ordering::Relaxed);
        self.total_exec_ms
            .fetch_add(exec_time.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record pending calls dropped by `clear()`
    pub fn record_cleared(&self, count: usize) {
        self.pending.fetch_sub(count as u64, Ordering::Relaxed);
        self.cleared.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn executions(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
            + self.timed_out.load(Ordering::Relaxed)
    }

    /// Average time a call waited before starting, in milliseconds
    pub fn avg_wait_ms(&self) -> f64 {
        let started = self.started.load(Ordering::Relaxed);
        if started == 0 {
            return 0.0;
        }
        self.total_wait_ms.load(Ordering::Relaxed) as f64 / started as f64
    }

    /// Average execution time, in milliseconds
    pub fn avg_exec_ms(&self) -> f64 {
        let executions = self.executions();
        if executions == 0 {
            return 0.0;
        }
        self.total_exec_ms.load(Ordering::Relaxed) as f64 / executions as f64
    }

    /// Share of submissions served by an existing execution
    pub fn dedup_ratio(&self) -> f64 {
        let submitted = self.submitted.load(Ordering::Relaxed);
        if submitted == 0 {
            return 0.0;
        }
        self.deduplicated.load(Ordering::Relaxed) as f64 / submitted as f64
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cleared: self.cleared.load(Ordering::Relaxed),
            max_pending: self.max_pending.load(Ordering::Relaxed),
            max_running: self.max_running.load(Ordering::Relaxed),
            avg_wait_ms: self.avg_wait_ms(),
            avg_exec_ms: self.avg_exec_ms(),
            dedup_ratio: self.dedup_ratio(),
        }
    }
}

/// Snapshot of queue metrics at a point in time
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueSnapshot {
    pub submitted: u64,
    pub deduplicated: u64,
    pub pending: u64,
    pub running: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cleared: u64,
    pub max_pending: u64,
    pub max_running: u64,
    pub avg_wait_ms: f64,
    pub avg_exec_ms: f64,
    pub dedup_ratio: f64,
}

/// Tracks when a call was queued and when it started
#[derive(Debug)]
pub struct CallTimer {
    pub queued_at: Instant,
    pub started_at: Option<Instant>,
}

impl CallTimer {
    pub fn new() -> Self {
        Self { queued_at: Instant::now(), started_at: None }
    }

    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    pub fn wait_time(&self) -> Duration {
        self.started_at
            .map(|s| s.duration_since(self.queued_at))
            .unwrap_or_else(|| self.queued_at.elapsed())
    }

    pub fn exec_time(&self) -> Duration {
        self.started_at.map(|s| s.elapsed()).unwrap_or(Duration::ZERO)
    }
}

impl Default for CallTimer {
    fn default() -> Self {
        Self::new()
    }
}
