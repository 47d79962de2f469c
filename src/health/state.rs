//! Backend connection state.
//!
//! # States
//! - Connected: the last probe or request reached the backend
//! - Disconnected: the last probe or request failed on the network path
//!
//! # State Transitions
//! ```text
//! Connected → Disconnected: any network-path failure   (edge: Lost)
//! Disconnected → Connected: any successful round trip  (edge: Restored)
//! ```
//!
//! Transitions are reported as edges so subscribers see one event per
//! outage, not one per failed tick.

use serde::Serialize;
use std::sync::Mutex;
use std::time::Instant;

use crate::net::protocol::Protocol;

/// A connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Restored,
    Lost,
}

#[derive(Debug)]
struct Inner {
    protocol: Protocol,
    protocol_persisted: bool,
    is_connected: bool,
    last_success_at: Option<Instant>,
    last_failure_at: Option<Instant>,
    consecutive_failures: u32,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            protocol: Protocol::Secure,
            protocol_persisted: false,
            is_connected: true,
            last_success_at: None,
            last_failure_at: None,
            consecutive_failures: 0,
        }
    }
}

/// Connectivity state owned by the connectivity service.
///
/// Every read-modify-write happens under one mutex so probe results and
/// request outcomes cannot interleave.
#[derive(Debug, Default)]
pub struct ConnectionState {
    inner: Mutex<Inner>,
}

/// Point-in-time copy of [`ConnectionState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub protocol: Protocol,
    pub protocol_persisted: bool,
    pub is_connected: bool,
    pub last_success_ago_ms: Option<u64>,
    pub last_failure_ago_ms: Option<u64>,
    pub consecutive_failures: u32,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("connection state mutex poisoned")
    }

    /// Record a successful round trip.
    pub fn record_success(&self) -> Option<Edge> {
        let mut inner = self.lock();
        inner.last_success_at = Some(Instant::now());
        inner.consecutive_failures = 0;
        if inner.is_connected {
            None
        } else {
            inner.is_connected = true;
            Some(Edge::Restored)
        }
    }

    /// Record a network-path failure.
    pub fn record_failure(&self) -> Option<Edge> {
        let mut inner = self.lock();
        inner.last_failure_at = Some(Instant::now());
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        if inner.is_connected {
            inner.is_connected = false;
            Some(Edge::Lost)
        } else {
            None
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_connected
    }

    pub fn protocol(&self) -> Protocol {
        self.lock().protocol
    }

    pub fn is_protocol_persisted(&self) -> bool {
        self.lock().protocol_persisted
    }

    /// Set the protocol; returns true if it changed.
    pub fn set_protocol(&self, protocol: Protocol, persist: bool) -> bool {
        let mut inner = self.lock();
        let changed = inner.protocol != protocol;
        inner.protocol = protocol;
        inner.protocol_persisted |= persist;
        changed
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let inner = self.lock();
        let ago = |at: Option<Instant>| at.map(|t| t.elapsed().as_millis() as u64);
        ConnectionSnapshot {
            protocol: inner.protocol,
            protocol_persisted: inner.protocol_persisted,
            is_connected: inner.is_connected,
            last_success_ago_ms: ago(inner.last_success_at),
            last_failure_ago_ms: ago(inner.last_failure_at),
            consecutive_failures: inner.consecutive_failures,
        }
    }

    /// Return to the start-of-process state, dropping the persisted protocol.
    pub fn reset(&self) {
        *self.lock() = Inner::default();
        tracing::info!("Connection state reset");
    }
}
