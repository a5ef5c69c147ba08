//! Authentication token caching for the shoplist client.
//!
//! Every authenticated API call needs a bearer token. Looking the session up
//! on each call is wasteful and, under load, produces bursts of identical
//! provider calls. [`AuthTokenCache`] keeps the last credential for a short
//! while and makes sure only one provider call is in flight at a time.
//!
//! ```text
//! get_auth_headers() ──► get_credential() ──► cached & unexpired? ──► hit
//!                                                    │ no
//!                                                    ▼
//!                                   refresh in flight? ──► join it
//!                                                    │ no
//!                                                    ▼
//!                                   SessionProvider::current_session()
//! ```

mod cache;
mod config;
mod metrics;
mod provider;

pub use cache::{AuthTokenCache, Credential};
pub use config::AuthConfig;
pub use metrics::{AuthMetrics, AuthStats};
pub use provider::{
    AnonymousSessionProvider, HttpSessionProvider, Session, SessionProvider,
    StaticSessionProvider,
};
