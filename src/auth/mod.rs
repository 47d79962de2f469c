//! Authenticated session management.
//!
//! # Data Flow
//! ```text
//! start() / Restored / AuthInvalidated
//!     → manager.rs (single-flight login with 2s/4s/8s retries)
//!     → session.rs (Session stored, SessionChange broadcast)
//!
//! ResilientClient:
//!     → ensure_session() before the request
//!     → authorization_header() on every attempt
//!     → invalidate() on an authorization mismatch
//! ```

pub mod manager;
pub mod session;

pub use manager::AuthSessionManager;
pub use session::{MemorySessionStore, Session, SessionChange, SessionChangeKind, SessionStore};
