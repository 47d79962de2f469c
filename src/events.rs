//! Typed publish/subscribe channel for connectivity events.
//!
//! The bus is owned by the connectivity service; UI and cache collaborators
//! hold a [`Subscription`] and react to transitions. Events are ephemeral:
//! a subscriber only sees what is published after it subscribed.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::net::protocol::Protocol;

/// Connectivity transitions published by the layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConnectivityEvent {
    /// The backend became reachable again.
    Restored,
    /// The backend stopped being reachable.
    Lost,
    /// Requests are now addressed over a different protocol.
    ProtocolChanged { protocol: Protocol },
    /// The backend rejected the current session.
    AuthInvalidated,
    /// A request failed on the network path after recovery was exhausted.
    ConnectionFailed,
    /// A session was established or cleared.
    AuthStateChanged { authenticated: bool },
}

impl ConnectivityEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectivityEvent::Restored => "connection_restored",
            ConnectivityEvent::Lost => "connection_lost",
            ConnectivityEvent::ProtocolChanged { .. } => "protocol_changed",
            ConnectivityEvent::AuthInvalidated => "auth_invalidated",
            ConnectivityEvent::ConnectionFailed => "connection_failed",
            ConnectivityEvent::AuthStateChanged { .. } => "auth_state_changed",
        }
    }
}

/// Broadcast bus for [`ConnectivityEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConnectivityEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ConnectivityEvent) {
        tracing::debug!(event = event.name(), "Publishing connectivity event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// A subscriber handle on the [`EventBus`].
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<ConnectivityEvent>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the bus is gone.
    ///
    /// A slow subscriber that falls behind skips the overwritten events.
    pub async fn recv(&mut self) -> Option<ConnectivityEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; `None` when nothing is pending.
    pub fn try_recv(&mut self) -> Option<ConnectivityEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain everything currently pending.
    pub fn drain(&mut self) -> Vec<ConnectivityEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
