//! Resilient connectivity layer between plant-operations clients and their
//! backend.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller ──▶ http::ResilientClient ──▶ resilience::RequestThrottler ──▶ CircuitBreaker
//!                    │                                                      │
//!                    ▼                                                      ▼
//!              net::ProtocolNegotiator ──▶ net::Transport ──────────────▶ backend
//!                    │
//!                    ▼
//!   health::ConnectionState ◀── health::HealthMonitor (periodic probe)
//!                    │
//!                    ▼
//!              events::EventBus ──▶ auth::AuthSessionManager, UI, caches
//! ```

// Core subsystems
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod net;

// Connectivity tracking and recovery
pub mod auth;
pub mod health;
pub mod resilience;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::LinkConfig;
pub use error::{FailureKind, LinkError, TransportError};
pub use events::{ConnectivityEvent, EventBus, Subscription};
pub use http::{BackendRequest, BackendResponse, RequestOptions, ResilientClient};
pub use lifecycle::{ConnectivityService, LinkStatus};
pub use net::{NetworkStatus, Protocol, Transport};
