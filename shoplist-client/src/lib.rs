//! Shoplist client library
//!
//! Client-side request coordination for the shopping-list API.
//!
//! All API traffic from the application goes through one [`ApiClient`],
//! which combines:
//!
//! - a [`RequestQueue`] bounding concurrent calls, ordering them by
//!   priority and collapsing identical reads into one network call;
//! - an [`AuthTokenCache`] keeping the bearer token for a short while and
//!   making sure concurrent lookups trigger a single session refresh;
//! - a [`Transport`] doing the actual HTTP work.
//!
//! # Example
//! ```no_run
//! use shoplist_client::{ApiClient, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), shoplist_client::ClientError> {
//!     let client = ApiClient::from_config(&ClientConfig::from_env())?;
//!     let categories: serde_json::Value = client.get_json("/api/categories").await?;
//!     println!("{}", categories);
//!     Ok(())
//! }
//! ```

use tracing::warn;

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod transport;

pub use auth::{AuthConfig, AuthTokenCache, Credential, Session, SessionProvider};
pub use client::ApiClient;
pub use config::ClientConfig;
pub use error::ClientError;
pub use queue::{CallHandle, CallOptions, QueueConfig, RequestQueue};
pub use reqwest::Method;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};

/// Initialize the Prometheus metrics registry.
/// Should be called once before building clients.
pub fn init_metrics() {
    if let Err(e) = metrics::register_metrics() {
        warn!("Failed to register Prometheus metrics: {}", e);
    }
}
