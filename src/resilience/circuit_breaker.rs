//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: cooldown elapsed, a single trial request is in flight
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold
//! Open → Half-Open: cooldown elapsed (failure_count reset to 0)
//! Half-Open → Closed: trial request succeeds
//! Half-Open → Open: trial request fails (opened_at reset)
//! Half-Open → Open: host reports no network (cooldown kept)
//! ```
//!
//! While the host is offline every call is rejected as open. A Closed
//! breaker keeps its state and counter, so coming back online admits calls
//! immediately.
//!
//! # Design Decisions
//! - Leaky-bucket recovery: a failure adds one, a success removes one
//! - The counter only returns to zero on the cooldown expiry check
//! - Single trial in Half-Open (prevents hammering a recovering backend)

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::CircuitBreakerConfig;
use crate::error::LinkError;
use crate::net::online::NetworkStatus;
use crate::observability::metrics;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    state_since: Instant,
}

/// Circuit breaker shared by every request of the connectivity layer.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    network: NetworkStatus,
    inner: Mutex<BreakerInner>,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
}

/// Statistics about the breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub threshold: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub time_in_state_ms: u64,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig, network: NetworkStatus) -> Self {
        Self {
            threshold: config.failure_threshold.max(1),
            cooldown: config.cooldown(),
            network,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                trial_in_flight: false,
                state_since: Instant::now(),
            }),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Whether a call would currently be admitted. Does not consume the
    /// Half-Open trial.
    pub fn check(&self) -> Result<(), LinkError> {
        let mut inner = self.lock();
        self.reject_if_offline(&mut inner)?;
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => match self.remaining_cooldown(&inner) {
                Some(retry_after) => Err(LinkError::CircuitOpen { retry_after }),
                None => Ok(()),
            },
            CircuitState::HalfOpen if inner.trial_in_flight => Err(LinkError::CircuitOpen {
                retry_after: Duration::ZERO,
            }),
            CircuitState::HalfOpen => Ok(()),
        }
    }

    /// Admit one call. The returned permit must report its outcome; a permit
    /// dropped without a report releases the trial slot it may hold.
    pub fn try_acquire(self: &Arc<Self>) -> Result<BreakerPermit, LinkError> {
        let mut inner = self.lock();
        self.reject_if_offline(&mut inner)?;

        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                if let Some(retry_after) = self.remaining_cooldown(&inner) {
                    return Err(LinkError::CircuitOpen { retry_after });
                }
                // Cooldown expiry check: the only place the counter is cleared.
                inner.failure_count = 0;
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(LinkError::CircuitOpen {
                        retry_after: Duration::ZERO,
                    });
                }
                inner.trial_in_flight = true;
                true
            }
        };

        if trial {
            tracing::info!("Circuit breaker admitting trial request");
        }
        Ok(BreakerPermit {
            breaker: self.clone(),
            trial,
            reported: false,
        })
    }

    /// Record a successful call made outside a permit. Decays the counter
    /// but never closes a Half-Open breaker; only the trial does that.
    pub fn record_success(&self) {
        self.succeeded(false);
    }

    fn succeeded(&self, trial: bool) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_sub(1);
        if trial && inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
            inner.opened_at = None;
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.threshold => {
                self.open(&mut inner);
            }
            CircuitState::HalfOpen => {
                inner.trial_in_flight = false;
                self.open(&mut inner);
            }
            _ => {}
        }
    }

    /// Force the breaker back to Closed with a zero counter.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
        self.transition(&mut inner, CircuitState::Closed);
        tracing::info!("Circuit breaker reset to CLOSED");
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        CircuitBreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            threshold: self.threshold,
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            time_in_state_ms: inner.state_since.elapsed().as_millis() as u64,
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    fn reject_if_offline(&self, inner: &mut BreakerInner) -> Result<(), LinkError> {
        if self.network.is_online() {
            return Ok(());
        }
        if inner.state == CircuitState::HalfOpen {
            tracing::warn!("Host offline, returning circuit breaker to OPEN");
            inner.trial_in_flight = false;
            self.transition(inner, CircuitState::Open);
        }
        Err(LinkError::CircuitOpen {
            retry_after: self.remaining_cooldown(inner).unwrap_or(Duration::ZERO),
        })
    }

    fn remaining_cooldown(&self, inner: &BreakerInner) -> Option<Duration> {
        let opened_at = inner.opened_at?;
        let elapsed = opened_at.elapsed();
        (elapsed < self.cooldown).then(|| self.cooldown - elapsed)
    }

    fn open(&self, inner: &mut BreakerInner) {
        inner.opened_at = Some(Instant::now());
        if inner.state != CircuitState::Open {
            tracing::warn!(
                failures = inner.failure_count,
                threshold = self.threshold,
                cooldown_secs = self.cooldown.as_secs(),
                "Circuit breaker opened"
            );
            self.transition(inner, CircuitState::Open);
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        if inner.state != to {
            tracing::info!(from = %inner.state, to = %to, "Circuit breaker state change");
            inner.state = to;
            inner.state_since = Instant::now();
            metrics::record_circuit_state(to);
        }
    }
}

/// Admission for one call through the breaker.
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    reported: bool,
}

impl BreakerPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.reported = true;
        self.breaker.succeeded(self.trial);
    }

    pub fn failure(mut self) {
        self.reported = true;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.reported && self.trial {
            self.breaker.release_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_secs: u64) -> (Arc<CircuitBreaker>, NetworkStatus) {
        let network = NetworkStatus::new();
        let config = CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown_secs,
        };
        (Arc::new(CircuitBreaker::new(&config, network.clone())), network)
    }

    #[test]
    fn test_starts_closed() {
        let (cb, _) = breaker(25, 120);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.check().is_ok());
        assert!(!cb.try_acquire().unwrap().is_trial());
    }

    #[test]
    fn test_opens_exactly_at_threshold() {
        let (cb, _) = breaker(25, 120);
        for _ in 0..24 {
            cb.try_acquire().unwrap().failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.try_acquire().unwrap().failure();
        assert_eq!(cb.state(), CircuitState::Open);

        let err = cb.try_acquire().unwrap_err();
        assert!(matches!(err, LinkError::CircuitOpen { retry_after } if retry_after > Duration::from_secs(100)));
        assert!(cb.check().is_err());
    }

    #[test]
    fn test_success_decays_by_one() {
        let (cb, _) = breaker(3, 120);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 1);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.record_success();
        cb.record_success();
        cb.record_success();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_single_trial_after_cooldown() {
        let (cb, _) = breaker(2, 0);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.failure_count(), 0);
        assert!(cb.try_acquire().is_err());
        assert!(cb.check().is_err());

        trial.success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.check().is_ok());
    }

    #[test]
    fn test_trial_failure_reopens() {
        let (cb, _) = breaker(2, 0);
        cb.record_failure();
        cb.record_failure();

        let trial = cb.try_acquire().unwrap();
        trial.failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.failure_count(), 1);
    }

    #[test]
    fn test_trial_failure_resets_opened_at() {
        let (cb, _) = breaker(1, 60);
        cb.record_failure();
        // Backdate the opening; skipped on hosts with less uptime than that.
        let Some(backdated) = Instant::now().checked_sub(Duration::from_secs(61)) else {
            return;
        };
        cb.lock().opened_at = Some(backdated);

        let trial = cb.try_acquire().unwrap();
        trial.failure();

        match cb.try_acquire().unwrap_err() {
            LinkError::CircuitOpen { retry_after } => {
                assert!(retry_after > Duration::from_secs(59));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_dropped_trial_rearms() {
        let (cb, _) = breaker(1, 0);
        cb.record_failure();
        let trial = cb.try_acquire().unwrap();
        drop(trial);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire().unwrap().is_trial());
    }

    #[test]
    fn test_offline_rejects_without_opening() {
        let (cb, network) = breaker(25, 120);
        network.set_online(false);
        assert!(matches!(cb.check(), Err(LinkError::CircuitOpen { .. })));
        assert!(matches!(cb.try_acquire(), Err(LinkError::CircuitOpen { .. })));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);

        // Back online: no cooldown to sit out.
        network.set_online(true);
        assert!(cb.check().is_ok());
        assert!(!cb.try_acquire().unwrap().is_trial());
    }

    #[test]
    fn test_offline_returns_half_open_to_open() {
        let (cb, network) = breaker(1, 0);
        cb.record_failure();
        let trial = cb.try_acquire().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        network.set_online(false);
        assert!(cb.try_acquire().is_err());
        assert_eq!(cb.state(), CircuitState::Open);

        // The stale trial no longer decides anything.
        trial.success();
        assert_eq!(cb.state(), CircuitState::Open);

        network.set_online(true);
        assert!(cb.try_acquire().unwrap().is_trial());
    }

    #[test]
    fn test_offline_keeps_open_cooldown() {
        let (cb, network) = breaker(1, 120);
        cb.record_failure();
        network.set_online(false);
        match cb.try_acquire().unwrap_err() {
            LinkError::CircuitOpen { retry_after } => {
                assert!(retry_after > Duration::from_secs(100));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_only_trial_closes_half_open() {
        let (cb, _) = breaker(2, 0);
        // Admitted while Closed, still in flight when the breaker opens.
        let stale = cb.try_acquire().unwrap();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_trial());
        stale.success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.try_acquire().is_err());

        trial.success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_reset() {
        let (cb, _) = breaker(1, 120);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_stats() {
        let (cb, _) = breaker(25, 120);
        cb.record_success();
        cb.record_success();
        cb.record_failure();

        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.total_successes, 2);
        assert_eq!(stats.total_failures, 1);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.threshold, 25);
    }
}
