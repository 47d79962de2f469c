//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, PLANTOPS_* env overrides)
//!     → validation.rs (semantic checks)
//!     → LinkConfig (validated, immutable)
//!     → handed to ConnectivityService, which splits it per component
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; tuning changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_from_env, ConfigError};
pub use schema::{
    AuthConfig, BackendConfig, CircuitBreakerConfig, HealthCheckConfig, LinkConfig,
    ObservabilityConfig, ProtocolConfig, RetryConfig, ThrottleConfig, TimeoutConfig,
};
