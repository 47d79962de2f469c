//! Network layer.
//!
//! # Data Flow
//! ```text
//! ResilientClient / HealthMonitor / AuthSessionManager
//!     → protocol.rs (choose Secure/Plain, build URL)
//!     → transport.rs (one round trip, FailureKind on error)
//!     → backend
//!
//! Host link signal:
//!     → online.rs (watch channel, read by breaker and client)
//! ```
//!
//! # Design Decisions
//! - Transport is a trait so tests and alternative stacks can plug in
//! - Protocol choice lives in ConnectionState, never in a global

pub mod online;
pub mod protocol;
pub mod transport;

#[cfg(test)]
pub(crate) mod scripted;

pub use online::NetworkStatus;
pub use protocol::{BackendTarget, Protocol, ProtocolNegotiator};
pub use transport::{ReqwestTransport, Transport, TransportRequest};
