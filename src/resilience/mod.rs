//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → throttle.rs (breaker check, wait for a FIFO slot)
//!     → circuit_breaker.rs (per-attempt permit, leaky failure count)
//!     → timeouts.rs (attempt timeout clamped to the request deadline)
//!     → On failure: retries.rs (classify the attempt)
//!     → backoff.rs (non-decreasing delay before the next attempt)
//! ```
//!
//! # Design Decisions
//! - One breaker and one throttler are shared by every request
//! - Backoff state lives with the logical request, not the attempt
//! - Every wait is cancellable

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod throttle;
pub mod timeouts;

pub use backoff::{calculate_backoff, Backoff};
pub use circuit_breaker::{BreakerPermit, CircuitBreaker, CircuitBreakerStats, CircuitState};
pub use retries::{classify_response, classify_transport, Failure, RetryPolicy};
pub use throttle::{RequestThrottler, RequestTicket, ThrottleSlot};
pub use timeouts::Deadline;
