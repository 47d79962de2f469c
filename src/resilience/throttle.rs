//! Concurrency throttle in front of the backend.
//!
//! Requests wait in submission order for one of `max_concurrent` slots. The
//! breaker is consulted before queueing, so an open circuit fails fast instead
//! of parking callers behind it, and again once a slot is obtained.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{LinkError, Result};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitBreaker;

/// A request waiting for, or holding, a slot.
#[derive(Debug, Clone)]
pub struct RequestTicket {
    /// Monotonic submission order.
    pub seq: u64,
    pub request_id: Uuid,
    pub submitted_at: Instant,
}

/// Holds one concurrency slot until dropped.
#[derive(Debug)]
pub struct ThrottleSlot {
    ticket: RequestTicket,
    throttler: Arc<ThrottleInner>,
    _permit: OwnedSemaphorePermit,
}

impl ThrottleSlot {
    pub fn ticket(&self) -> &RequestTicket {
        &self.ticket
    }
}

impl Drop for ThrottleSlot {
    fn drop(&mut self) {
        // The permit is released after this body runs.
        let in_flight = self.throttler.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_throttle(in_flight, self.throttler.queued.load(Ordering::SeqCst));
    }
}

#[derive(Debug)]
struct ThrottleInner {
    in_flight: AtomicUsize,
    queued: AtomicUsize,
}

/// Decrements the queue gauge however the wait ends.
struct QueuedGuard<'a>(&'a AtomicUsize);

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// FIFO concurrency limiter gated by the circuit breaker.
#[derive(Debug)]
pub struct RequestThrottler {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    breaker: Arc<CircuitBreaker>,
    next_seq: AtomicU64,
    inner: Arc<ThrottleInner>,
}

impl RequestThrottler {
    pub fn new(max_concurrent: usize, breaker: Arc<CircuitBreaker>) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            breaker,
            next_seq: AtomicU64::new(0),
            inner: Arc::new(ThrottleInner {
                in_flight: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
            }),
        }
    }

    /// Issue a ticket stamped with the next submission number.
    pub fn ticket(&self, request_id: Uuid) -> RequestTicket {
        RequestTicket {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            request_id,
            submitted_at: Instant::now(),
        }
    }

    /// Wait for a slot.
    ///
    /// Fails with `CircuitOpen` without queueing when the breaker rejects,
    /// and with `Cancelled` if `cancel` fires while waiting. Dropping the
    /// returned future gives up the place in the queue.
    pub async fn acquire(
        &self,
        ticket: RequestTicket,
        cancel: &CancellationToken,
    ) -> Result<ThrottleSlot> {
        self.breaker.check()?;

        let permit = {
            self.inner.queued.fetch_add(1, Ordering::SeqCst);
            let _queued = QueuedGuard(&self.inner.queued);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LinkError::Cancelled),
                permit = self.semaphore.clone().acquire_owned() => {
                    permit.map_err(|_| LinkError::Cancelled)?
                }
            }
        };

        let in_flight = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let slot = ThrottleSlot {
            ticket,
            throttler: self.inner.clone(),
            _permit: permit,
        };
        metrics::record_throttle(in_flight, self.queued());
        tracing::trace!(
            seq = slot.ticket.seq,
            request_id = %slot.ticket.request_id,
            waited_ms = slot.ticket.submitted_at.elapsed().as_millis() as u64,
            "Throttle slot acquired"
        );

        // The breaker may have opened while this request was queued.
        self.breaker.check()?;
        Ok(slot)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::net::online::NetworkStatus;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn throttler(max: usize, threshold: u32) -> (Arc<RequestThrottler>, Arc<CircuitBreaker>) {
        let config = CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown_secs: 120,
        };
        let breaker = Arc::new(CircuitBreaker::new(&config, NetworkStatus::new()));
        (Arc::new(RequestThrottler::new(max, breaker.clone())), breaker)
    }

    #[tokio::test]
    async fn test_single_slot_is_exclusive() {
        let (throttle, _) = throttler(1, 25);
        let cancel = CancellationToken::new();
        let slot = throttle.acquire(throttle.ticket(Uuid::new_v4()), &cancel).await.unwrap();
        assert_eq!(throttle.in_flight(), 1);

        let waiter = {
            let throttle = throttle.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                throttle.acquire(throttle.ticket(Uuid::new_v4()), &cancel).await.map(|_| ())
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(throttle.queued(), 1);

        drop(slot);
        waiter.await.unwrap().unwrap();
        assert_eq!(throttle.in_flight(), 0);
        assert_eq!(throttle.queued(), 0);
    }

    #[tokio::test]
    async fn test_slots_served_in_submission_order() {
        let (throttle, _) = throttler(1, 25);
        let cancel = CancellationToken::new();
        let first = throttle.acquire(throttle.ticket(Uuid::new_v4()), &cancel).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        for i in 0..5u32 {
            let throttle = throttle.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let _slot = throttle.acquire(throttle.ticket(Uuid::new_v4()), &cancel).await.unwrap();
                tx.send(i).unwrap();
            });
            // Let each waiter enqueue before the next is spawned.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(tx);
        drop(first);

        let mut order = Vec::new();
        while let Some(i) = rx.recv().await {
            order.push(i);
        }
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_cancel_while_queued_releases_place() {
        let (throttle, _) = throttler(1, 25);
        let outer = CancellationToken::new();
        let held = throttle.acquire(throttle.ticket(Uuid::new_v4()), &outer).await.unwrap();

        let cancel = CancellationToken::new();
        let waiter = {
            let throttle = throttle.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                throttle.acquire(throttle.ticket(Uuid::new_v4()), &cancel).await.map(|_| ())
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        assert!(matches!(waiter.await.unwrap(), Err(LinkError::Cancelled)));
        assert_eq!(throttle.queued(), 0);

        drop(held);
        assert!(throttle.acquire(throttle.ticket(Uuid::new_v4()), &outer).await.is_ok());
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast_without_queueing() {
        let (throttle, breaker) = throttler(1, 1);
        breaker.record_failure();
        let result = throttle
            .acquire(throttle.ticket(Uuid::new_v4()), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(LinkError::CircuitOpen { .. })));
        assert_eq!(throttle.queued(), 0);
        assert_eq!(throttle.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_breaker_rechecked_after_wait() {
        let (throttle, breaker) = throttler(1, 1);
        let cancel = CancellationToken::new();
        let held = throttle.acquire(throttle.ticket(Uuid::new_v4()), &cancel).await.unwrap();

        let waiter = {
            let throttle = throttle.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                throttle.acquire(throttle.ticket(Uuid::new_v4()), &cancel).await.map(|_| ())
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        breaker.record_failure();
        drop(held);

        assert!(matches!(waiter.await.unwrap(), Err(LinkError::CircuitOpen { .. })));
        assert_eq!(throttle.in_flight(), 0);
    }

    #[test]
    fn test_tickets_are_monotonic() {
        let (throttle, _) = throttler(2, 25);
        let a = throttle.ticket(Uuid::new_v4());
        let b = throttle.ticket(Uuid::new_v4());
        assert!(b.seq > a.seq);
        assert_eq!(throttle.max_concurrent(), 2);
    }
}
