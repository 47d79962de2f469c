//! Backend request handling.
//!
//! # Data Flow
//! ```text
//! Caller
//!     → request.rs (BackendRequest, request id)
//!     → client.rs (session, throttle slot, breaker permit, retries)
//!     → net/transport.rs (one round trip)
//!     → response.rs (status, headers, body)
//! ```

pub mod client;
pub mod request;
pub mod response;

pub use client::{ClientParts, RequestOptions, ResilientClient};
pub use request::BackendRequest;
pub use response::BackendResponse;
