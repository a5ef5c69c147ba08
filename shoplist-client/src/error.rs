//! Error types for the shoplist client.

use std::time::Duration;

/// Client error types
///
/// `Clone` because a deduplicated call hands the same outcome to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Call did not finish within its timeout
    #[error("Request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Call was still pending when the queue was cleared
    #[error("Queue cleared before the request started")]
    QueueCleared,

    /// Network-level failure from the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// API answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// No valid credential when auth headers were requested
    #[error("Not authenticated")]
    Unauthenticated,

    /// Session provider failed
    #[error("Session provider error: {0}")]
    Session(String),

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Execution task went away without reporting a result
    #[error("Request canceled")]
    Canceled,
}

impl ClientError {
    /// Whether a resubmission of the same call may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Timeout { .. } | ClientError::QueueCleared | ClientError::Transport(_) => {
                true
            }
            ClientError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Timeout { .. } => "timeout",
            ClientError::QueueCleared => "cleared",
            ClientError::Transport(_) => "transport",
            ClientError::Http { .. } => "http",
            ClientError::Unauthenticated => "unauthenticated",
            ClientError::Session(_) => "session",
            ClientError::Decode(_) => "decode",
            ClientError::InvalidRequest(_) => "invalid_request",
            ClientError::Canceled => "canceled",
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else if e.is_builder() {
            ClientError::InvalidRequest(e.to_string())
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}
