//! Priority request queue with bounded concurrency and call deduplication.
//!
//! Calls are registered synchronously on `submit`; each one is started as a
//! Tokio task once a concurrency slot is free. Every waiter of a call holds a
//! clone of the same shared outcome, so a deduplicated call runs once and
//! fans its result out to all of them.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::config::QueueConfig;
use super::metrics::{CallTimer, QueueMetrics, QueueSnapshot};
use crate::error::ClientError;
use crate::metrics::prometheus as prom;

/// Result of a queued call
pub type CallResult<T> = Result<T, ClientError>;

type SharedOutcome<T> = Shared<BoxFuture<'static, CallResult<T>>>;

/// Per-call scheduling options
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Higher runs first; ties keep submission order
    pub priority: i32,
    /// Calls sharing a key collapse into one execution
    pub dedup_key: Option<String>,
    /// Overrides the queue's default timeout for this call
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn priority(priority: i32) -> Self {
        Self { priority, ..Self::default() }
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Handle to a submitted call; resolves with the call's outcome
#[must_use = "a call handle does nothing unless awaited"]
pub struct CallHandle<T: Clone> {
    id: String,
    deduplicated: bool,
    outcome: SharedOutcome<T>,
}

impl<T: Clone> CallHandle<T> {
    /// Id given at submission
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether this submission attached to an execution started by another one
    pub fn is_deduplicated(&self) -> bool {
        self.deduplicated
    }
}

impl<T: Clone> Future for CallHandle<T> {
    type Output = CallResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.outcome.poll_unpin(cx)
    }
}

/// A call waiting for (or holding) a concurrency slot
struct QueuedCall<T> {
    id: String,
    seq: u64,
    priority: i32,
    dedup_key: Option<String>,
    timeout: Duration,
    execute: BoxFuture<'static, CallResult<T>>,
    responder: oneshot::Sender<CallResult<T>>,
    timer: CallTimer,
}

struct DedupEntry<T: Clone> {
    seq: u64,
    outcome: SharedOutcome<T>,
}

struct QueueState<T: Clone> {
    /// Descending priority, ascending arrival
    pending: VecDeque<QueuedCall<T>>,
    /// seq -> id of calls currently executing
    running: HashMap<u64, String>,
    dedup: HashMap<String, DedupEntry<T>>,
    max_concurrent: usize,
    timeout: Duration,
    dedup_window: Duration,
    next_seq: u64,
}

struct QueueInner<T: Clone> {
    state: Mutex<QueueState<T>>,
    metrics: Arc<QueueMetrics>,
}

/// Bounded-concurrency request queue
///
/// Cloning yields another handle to the same queue.
pub struct RequestQueue<T: Clone> {
    inner: Arc<QueueInner<T>>,
}

impl<T: Clone> Clone for RequestQueue<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> RequestQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new request queue with the given configuration
    pub fn new(config: QueueConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        prom::set_max_concurrent(max_concurrent);
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    running: HashMap::new(),
                    dedup: HashMap::new(),
                    max_concurrent,
                    timeout: config.timeout,
                    dedup_window: config.dedup_window,
                    next_seq: 0,
                }),
                metrics: Arc::new(QueueMetrics::new()),
            }),
        }
    }

    /// Submit a call with default priority and no dedup key
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit<F>(&self, id: impl Into<String>, execute: F) -> CallHandle<T>
    where
        F: Future<Output = CallResult<T>> + Send + 'static,
    {
        self.submit_with(id, execute, CallOptions::default())
    }

    /// Submit a call with explicit priority, dedup key and timeout
    ///
    /// If `options.dedup_key` matches a call that is still running, or that
    /// succeeded within its dedup window, `execute` is dropped unpolled and
    /// the handle resolves with that call's outcome. A call that failed or
    /// was cleared releases its key as soon as it settles, so a later
    /// duplicate inside the window runs again. Must be called from within a
    /// Tokio runtime.
    pub fn submit_with<F>(
        &self,
        id: impl Into<String>,
        execute: F,
        options: CallOptions,
    ) -> CallHandle<T>
    where
        F: Future<Output = CallResult<T>> + Send + 'static,
    {
        let id = id.into();
        let metrics = &self.inner.metrics;
        metrics.record_submitted();

        let mut state = self.inner.state.lock();

        if let Some(key) = options.dedup_key.as_deref() {
            if let Some(entry) = state.dedup.get(key) {
                metrics.record_deduplicated();
                prom::record_dedup_hit();
                debug!(id = %id, dedup_key = %key, "Call attached to in-flight execution");
                return CallHandle { id, deduplicated: true, outcome: entry.outcome.clone() };
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;

        let (responder, receiver) = oneshot::channel();
        let outcome: SharedOutcome<T> = receiver
            .map(|received| received.unwrap_or(Err(ClientError::Canceled)))
            .boxed()
            .shared();

        if let Some(key) = &options.dedup_key {
            state
                .dedup
                .insert(key.clone(), DedupEntry { seq, outcome: outcome.clone() });
            spawn_dedup_cleanup(
                Arc::downgrade(&self.inner),
                key.clone(),
                seq,
                outcome.clone(),
                state.dedup_window,
            );
        }

        let call = QueuedCall {
            id: id.clone(),
            seq,
            priority: options.priority,
            dedup_key: options.dedup_key,
            timeout: options.timeout.unwrap_or(state.timeout),
            execute: execute.boxed(),
            responder,
            timer: CallTimer::new(),
        };

        let pos = state
            .pending
            .iter()
            .position(|c| c.priority < call.priority)
            .unwrap_or(state.pending.len());
        state.pending.insert(pos, call);

        metrics.record_queued();
        prom::add_pending_calls(1);

        debug!(
            id = %id,
            priority = options.priority,
            pending = state.pending.len(),
            running = state.running.len(),
            "Call enqueued"
        );

        schedule(&self.inner, &mut state);

        CallHandle { id, deduplicated: false, outcome }
    }

    /// Reject every pending call with [`ClientError::QueueCleared`]
    ///
    /// Running calls are left alone. Returns the number of rejected calls.
    pub fn clear(&self) -> usize {
        let cleared: Vec<QueuedCall<T>> = {
            let mut state = self.inner.state.lock();
            let drained: Vec<QueuedCall<T>> = state.pending.drain(..).collect();
            for call in &drained {
                if let Some(key) = &call.dedup_key {
                    if state.dedup.get(key).is_some_and(|e| e.seq == call.seq) {
                        state.dedup.remove(key);
                    }
                }
            }
            drained
        };

        let count = cleared.len();
        if count == 0 {
            return 0;
        }

        self.inner.metrics.record_cleared(count);
        prom::add_pending_calls(-(count as i64));
        for call in cleared {
            prom::record_call("cleared", None);
            let _ = call.responder.send(Err(ClientError::QueueCleared));
        }

        debug!(count, "Pending calls cleared");
        count
    }

    /// Change the concurrency bound; extra capacity is used immediately
    pub fn set_max_concurrent(&self, n: usize) {
        let n = n.max(1);
        let mut state = self.inner.state.lock();
        state.max_concurrent = n;
        prom::set_max_concurrent(n);
        schedule(&self.inner, &mut state);
    }

    /// Default timeout for calls submitted from now on
    pub fn set_timeout(&self, timeout: Duration) {
        self.inner.state.lock().timeout = timeout;
    }

    /// Dedup window for calls submitted from now on
    pub fn set_dedup_window(&self, window: Duration) {
        self.inner.state.lock().dedup_window = window;
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.state.lock().max_concurrent
    }

    pub fn timeout(&self) -> Duration {
        self.inner.state.lock().timeout
    }

    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn running_len(&self) -> usize {
        self.inner.state.lock().running.len()
    }

    /// Ids of pending calls in the order they will start
    pub fn pending_ids(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        state.pending.iter().map(|c| c.id.clone()).collect()
    }

    /// Number of dedup keys currently absorbing duplicates
    pub fn dedup_len(&self) -> usize {
        self.inner.state.lock().dedup.len()
    }

    pub fn metrics(&self) -> Arc<QueueMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    pub fn stats(&self) -> QueueSnapshot {
        self.inner.metrics.snapshot()
    }
}

/// Start pending calls while there is spare capacity
fn schedule<T>(inner: &Arc<QueueInner<T>>, state: &mut QueueState<T>)
where
    T: Clone + Send + Sync + 'static,
{
    while state.running.len() < state.max_concurrent {
        let Some(mut call) = state.pending.pop_front() else {
            break;
        };

        call.timer.start();
        let wait_time = call.timer.wait_time();
        state.running.insert(call.seq, call.id.clone());

        inner.metrics.record_started(wait_time);
        prom::add_pending_calls(-1);
        prom::add_active_calls(1);
        prom::record_queue_wait(wait_time.as_secs_f64());

        debug!(
            id = %call.id,
            priority = call.priority,
            wait_ms = wait_time.as_millis() as u64,
            running = state.running.len(),
            "Call started"
        );

        tokio::spawn(run_call(Arc::clone(inner), call));
    }
}

async fn run_call<T>(inner: Arc<QueueInner<T>>, call: QueuedCall<T>)
where
    T: Clone + Send + Sync + 'static,
{
    let QueuedCall { id, seq, timeout, execute, responder, timer, .. } = call;

    let guarded = AssertUnwindSafe(execute).catch_unwind();
    let outcome = match tokio::time::timeout(timeout, guarded).await {
        Ok(Ok(Ok(value))) => {
            inner.metrics.record_completed(timer.exec_time());
            prom::record_call("success", Some(timer.exec_time().as_secs_f64()));
            Ok(value)
        }
        Ok(Ok(Err(e))) => {
            inner.metrics.record_failed(timer.exec_time());
            prom::record_call("failure", Some(timer.exec_time().as_secs_f64()));
            debug!(id = %id, error = %e, "Call failed");
            Err(e)
        }
        Ok(Err(_)) => {
            inner.metrics.record_failed(timer.exec_time());
            prom::record_call("failure", Some(timer.exec_time().as_secs_f64()));
            warn!(id = %id, "Call panicked");
            Err(ClientError::Canceled)
        }
        Err(_) => {
            inner.metrics.record_timeout(timer.exec_time());
            prom::record_call("timeout", Some(timer.exec_time().as_secs_f64()));
            warn!(id = %id, timeout_ms = timeout.as_millis() as u64, "Call timed out");
            Err(ClientError::Timeout { timeout })
        }
    };

    // Free the slot before waking waiters so they observe the new running count.
    {
        let mut state = inner.state.lock();
        state.running.remove(&seq);
        prom::add_active_calls(-1);
        schedule(&inner, &mut state);
    }

    let _ = responder.send(outcome);
}

/// Drop a dedup entry once its call has finished and its window has passed
///
/// Failed calls drop the entry as soon as they finish so a retry runs again.
fn spawn_dedup_cleanup<T>(
    inner: Weak<QueueInner<T>>,
    key: String,
    seq: u64,
    outcome: SharedOutcome<T>,
    window: Duration,
) where
    T: Clone + Send + Sync + 'static,
{
    let deadline = tokio::time::Instant::now() + window;
    tokio::spawn(async move {
        if outcome.await.is_ok() {
            tokio::time::sleep_until(deadline).await;
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut state = inner.state.lock();
        if state.dedup.get(&key).is_some_and(|e| e.seq == seq) {
            state.dedup.remove(&key);
            debug!(dedup_key = %key, "Dedup entry expired");
        }
    });
}
