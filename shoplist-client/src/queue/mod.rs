//! Request queuing and deduplication for the shoplist client.
//!
//! Every outbound API call goes through a [`RequestQueue`], which bounds how
//! many calls are in flight at once and collapses identical reads into one
//! execution.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  submit(id, call, opts)                  │
//! └───────────────────────────┬─────────────────────────────┘
//!                             │
//!                    ┌────────▼────────┐
//!                    │   Dedup map     │ ← key hit: attach as waiter
//!                    └────────┬────────┘
//!                             │ miss
//!                    ┌────────▼────────┐
//!                    │  Pending queue  │ ← priority desc, FIFO ties
//!                    └────────┬────────┘
//!                             │
//!                    ┌────────▼────────┐
//!                    │   Running set   │ ← at most max_concurrent
//!                    │ (timeout race)  │
//!                    └────────┬────────┘
//!                             │
//!                    ┌────────▼────────┐
//!                    │   Transport     │
//!                    └─────────────────┘
//! ```
//!
//! # Features
//!
//! - **Concurrency Control**: at most `max_concurrent` calls execute at once
//! - **Priority**: higher priority pending calls start first, never preempting
//! - **Deduplication**: calls sharing a dedup key run once per dedup window
//! - **Timeouts**: each execution races a per-call timer
//! - **Metrics**: queue depth, wait times, dedup ratio

mod config;
mod metrics;
mod request_queue;

pub use config::QueueConfig;
pub use metrics::{CallTimer, QueueMetrics, QueueSnapshot};
pub use request_queue::{CallHandle, CallOptions, CallResult, RequestQueue};
