//! Deadlines and cancellable waits.
//!
//! # Responsibilities
//! - Track the overall deadline of one logical request
//! - Bound each attempt by the smaller of its own timeout and the deadline
//! - Make every wait (slot, backoff, online signal) cancellable
//!
//! # Design Decisions
//! - Uses Tokio's time facilities and `tokio_util` cancellation tokens
//! - Cancellation and deadline expiry both surface as `LinkError::Cancelled`

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{LinkError, Result};

/// Cancellation scope of one logical request.
#[derive(Debug, Clone)]
pub struct Deadline {
    cancel: CancellationToken,
    expires_at: Option<Instant>,
}

impl Deadline {
    pub fn new(cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            expires_at: timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn none() -> Self {
        Self::new(CancellationToken::new(), None)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Error if cancelled or expired.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() || self.remaining() == Some(Duration::ZERO) {
            Err(LinkError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Time left, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Clamp an attempt timeout to the deadline.
    pub fn clamp(&self, timeout: Duration) -> Duration {
        match self.remaining() {
            Some(left) => timeout.min(left),
            None => timeout,
        }
    }

    /// Run `fut` unless cancellation or the deadline wins first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let expiry = async {
            match self.expires_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(LinkError::Cancelled),
            _ = expiry => Err(LinkError::Cancelled),
            value = fut => Ok(value),
        }
    }

    /// Cancellable sleep.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(tokio::time::sleep(duration)).await
    }
}
