//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe {base}/api/health
//!     → Update state.rs
//!
//! Passive health checks (http/client.rs):
//!     Request outcome observed
//!     → Update state.rs
//!
//! State machine (state.rs):
//!     Connected ←→ Disconnected
//!     Each transition publishes exactly one event
//! ```
//!
//! # Design Decisions
//! - Active and passive checks feed the same state
//! - Events are edge-triggered so long outages do not flood subscribers

pub mod active;
pub mod state;

pub use active::HealthMonitor;
pub use state::{ConnectionSnapshot, ConnectionState, Edge};

use crate::events::{ConnectivityEvent, EventBus};

/// Publish the event matching a state transition, if there was one.
pub(crate) fn publish_edge(events: &EventBus, edge: Option<Edge>) {
    match edge {
        Some(Edge::Restored) => {
            tracing::info!("Backend connectivity restored");
            events.publish(ConnectivityEvent::Restored);
        }
        Some(Edge::Lost) => {
            tracing::warn!("Backend connectivity lost");
            events.publish(ConnectivityEvent::Lost);
        }
        None => {}
    }
}
