use std::sync::Arc;

use thiserror::Error;

/// Top-level error type for the `hcmqtt-api` crate.
///
/// Covers transport, authorization, REST and event-stream failures.
/// `hcmqtt-core` wraps these in its own error type.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authorization ───────────────────────────────────────────────
    /// No refresh credential is stored yet; the user has not authorized.
    #[error("Not authorized -- no refresh token stored")]
    NotAuthorized,

    /// The shared token refresh failed. Every waiter sees the same cause.
    #[error("Token refresh failed: {0}")]
    TokenRefresh(Arc<Error>),

    /// The credential store could not be read or written.
    #[error("Credential store error: {0}")]
    Credentials(String),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, reset, etc.)
    #[error("Connection error: {0}")]
    Connection(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS or client construction error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The event stream delivered no bytes within the idle timeout.
    #[error("Event stream idle for {timeout_secs}s")]
    IdleTimeout { timeout_secs: u64 },

    // ── API ─────────────────────────────────────────────────────────
    /// Non-2xx response from the API.
    #[error("API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    // ── Data ────────────────────────────────────────────────────────
    /// A request body could not be serialized.
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// HTTP status of an API error, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::TokenRefresh(inner) => inner.status(),
            _ => None,
        }
    }

    /// Returns `true` for the 404/409 statuses the API uses when a resource
    /// is unavailable (appliance offline, no program running).
    ///
    /// Only a direct API response counts; the same statuses from the token
    /// endpoint are authorization failures.
    pub fn is_not_found_or_conflict(&self) -> bool {
        matches!(self, Self::Api { status: 404 | 409, .. })
    }

    /// Returns `true` if the user must (re-)authorize before anything works.
    pub fn is_not_authorized(&self) -> bool {
        match self {
            Self::NotAuthorized => true,
            Self::TokenRefresh(inner) => inner.is_not_authorized(),
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_timeout() || e.is_connect(),
            Self::IdleTimeout { .. } => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::TokenRefresh(inner) => inner.is_transient(),
            _ => false,
        }
    }
}
