//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (service.rs):
//!     Config → shared state → negotiate protocol → start monitor and auth task
//!
//! Shutdown:
//!     stop() → each background task's CancellationToken fires → task aborted
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → daemon calls stop()
//! ```
//!
//! # Design Decisions
//! - The service is constructed explicitly; there is no global instance
//! - start() and stop() are idempotent

pub mod service;
pub mod signals;

pub use service::{ConnectivityService, LinkStatus, ThrottleStatus};
pub use signals::shutdown_signal;
