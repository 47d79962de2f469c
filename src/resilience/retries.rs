//! Retry policy and failure classification.
//!
//! # Responsibilities
//! - Classify each failed attempt into a recovery class
//! - Carry the immutable retry tuning shared by all call sites
//! - Allow per-call-site overrides without touching the shared policy
//!
//! # Design Decisions
//! - Classification is driven by status codes and transport failure kinds
//! - 4xx are NOT retried (client error, not backend), except 408 and 429
//! - Auth mismatches are never retried here; the caller re-issues after
//!   re-authentication

use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{FailureKind, LinkError, TransportError};
use crate::http::BackendResponse;
use crate::resilience::backoff::Backoff;

/// Retry tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts allowed per logical request, the first one included. The
    /// single protocol-fallback retry is not counted.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
    /// Minimum wait after a network-changed failure.
    pub network_changed_floor: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
            network_changed_floor: Duration::from_millis(config.network_changed_floor_ms),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_network_changed_floor(mut self, floor: Duration) -> Self {
        self.network_changed_floor = floor;
        self
    }

    /// Attempt budget, never below one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Fresh backoff state for one logical request.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.base_delay, self.max_delay, self.multiplier, self.jitter)
    }
}

/// Recovery class of one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// TLS-class failure: fall back to plain transport once.
    Protocol(String),
    /// The host link changed: wait for it, then back off.
    NetworkChanged(String),
    /// Generic network, timeout or server failure: back off.
    Transient(String),
    /// The session was rejected.
    AuthMismatch,
    /// Non-retryable client error.
    Rejected { status: u16, body: String },
}

impl Failure {
    /// Whether the failure says anything about the network path. Client
    /// errors and auth mismatches prove the backend is reachable.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Failure::Protocol(_) | Failure::NetworkChanged(_) | Failure::Transient(_)
        )
    }

    /// Metrics label.
    pub fn reason(&self) -> &'static str {
        match self {
            Failure::Protocol(_) => "protocol",
            Failure::NetworkChanged(_) => "network_changed",
            Failure::Transient(_) => "transient",
            Failure::AuthMismatch => "auth_mismatch",
            Failure::Rejected { .. } => "rejected",
        }
    }

    /// The error surfaced when this failure is not recovered after
    /// `attempts` tries.
    pub fn into_error(self, attempts: u32) -> LinkError {
        match self {
            Failure::Protocol(m) => LinkError::Protocol(m),
            Failure::NetworkChanged(last_error) | Failure::Transient(last_error) => {
                LinkError::ExhaustedRetries {
                    attempts,
                    last_error,
                }
            }
            Failure::AuthMismatch => LinkError::AuthMismatch,
            Failure::Rejected { status, body } => LinkError::Rejected { status, body },
        }
    }
}

/// Classify a transport-level failure.
pub fn classify_transport(err: &TransportError) -> Failure {
    match err.kind {
        FailureKind::Tls => Failure::Protocol(err.message.clone()),
        FailureKind::NetworkChanged => Failure::NetworkChanged(err.message.clone()),
        FailureKind::Timeout | FailureKind::Connect | FailureKind::Other => {
            Failure::Transient(format!("{}: {}", err.kind.as_str(), err.message))
        }
    }
}

/// Classify a received response; `None` means success.
pub fn classify_response(response: &BackendResponse, mismatch_markers: &[String]) -> Option<Failure> {
    match response.status {
        200..=399 => None,
        403 if response.is_auth_mismatch(mismatch_markers) => Some(Failure::AuthMismatch),
        408 | 429 => Some(Failure::Transient(format!("status {}", response.status))),
        400..=499 => Some(Failure::Rejected {
            status: response.status,
            body: response.body.clone(),
        }),
        _ => Some(Failure::Transient(format!("status {}", response.status))),
    }
}
