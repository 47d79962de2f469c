//! Error taxonomy for the connectivity layer.
//!
//! # Classification
//! ```text
//! transport failure (net/transport.rs)
//!     → FailureKind (closed set, assigned at the transport boundary)
//!     → Failure (per-attempt classification, resilience/retries.rs)
//!     → LinkError (what callers see once recovery is exhausted)
//! ```

use std::time::Duration;
use thiserror::Error;

/// Transport-level failure categories.
///
/// Assigned once by the transport adapter; nothing downstream inspects error
/// strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Certificate or TLS handshake failure.
    Tls,
    /// The host's network link changed underneath the request.
    NetworkChanged,
    /// The request or connection timed out.
    Timeout,
    /// The connection could not be established.
    Connect,
    /// Any other I/O-level failure.
    Other,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Tls => "tls",
            FailureKind::NetworkChanged => "network_changed",
            FailureKind::Timeout => "timeout",
            FailureKind::Connect => "connect",
            FailureKind::Other => "other",
        }
    }
}

/// A failed round trip, before any HTTP status was received.
#[derive(Debug, Clone, Error)]
#[error("{kind:?} failure: {message}")]
pub struct TransportError {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Errors surfaced to callers of the connectivity layer.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    /// TLS-class failure that recurred after the single protocol fallback.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The backend rejected the session; it has been invalidated and
    /// re-authentication is under way. The caller must re-issue the request.
    #[error("authorization mismatch, session invalidated")]
    AuthMismatch,

    /// The circuit breaker is open; no network call was made.
    #[error("circuit breaker open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    /// The retry budget of the request was consumed.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    /// Non-retryable HTTP status (4xx other than an auth mismatch).
    #[error("backend rejected request with status {status}")]
    Rejected { status: u16, body: String },

    /// Credential authentication failed.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The caller cancelled the request or its deadline passed.
    #[error("request cancelled")]
    Cancelled,

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A successful response carried a body of the wrong shape.
    #[error("failed to decode response body: {0}")]
    Decode(String),
}

impl LinkError {
    /// True when the error reflects a degraded link rather than a failed
    /// request; callers render an offline indicator instead of an error.
    pub fn is_degraded(&self) -> bool {
        matches!(self, LinkError::CircuitOpen { .. })
    }

    /// True for errors caused by the network path itself.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            LinkError::Protocol(_) | LinkError::ExhaustedRetries { .. }
        )
    }

    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            LinkError::Protocol(_) => "protocol",
            LinkError::AuthMismatch => "auth_mismatch",
            LinkError::CircuitOpen { .. } => "circuit_open",
            LinkError::ExhaustedRetries { .. } => "exhausted",
            LinkError::Rejected { .. } => "rejected",
            LinkError::Authentication(_) => "authentication",
            LinkError::Cancelled => "cancelled",
            LinkError::InvalidRequest(_) => "invalid_request",
            LinkError::Decode(_) => "decode",
        }
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
