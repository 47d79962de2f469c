//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! connectivity layer. All types derive Serde traits for deserialization from
//! config files; defaults carry the tuning observed in production.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the connectivity layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LinkConfig {
    /// Backend addressing (host, base URL, proxy path).
    pub backend: BackendConfig,

    /// Protocol negotiation switches.
    pub protocol: ProtocolConfig,

    /// Health probe settings.
    pub health_check: HealthCheckConfig,

    /// Circuit breaker tuning.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Request throttling.
    pub throttle: ThrottleConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Service credentials and session handling.
    pub auth: AuthConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Backend addressing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend host with optional port (e.g., "records.plant.local:8090").
    pub host: String,

    /// Absolute base URL; when set, no protocol probing happens.
    pub base_url: Option<String>,

    /// Same-origin proxy URL used when plain transport must not be exposed.
    pub proxy_url: Option<String>,

    /// The deployment is served over HTTPS and cannot call plain endpoints
    /// directly (mixed content).
    pub require_https: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "localhost:8090".to_string(),
            base_url: None,
            proxy_url: None,
            require_https: false,
        }
    }
}

/// Protocol negotiation switches.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Always use plain transport.
    pub force_plain: bool,

    /// Always route through the proxy URL.
    pub force_proxy: bool,

    /// Timeout for the detection probes in milliseconds.
    pub detect_timeout_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            force_plain: false,
            force_proxy: false,
            detect_timeout_ms: 3000,
        }
    }
}

impl ProtocolConfig {
    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.detect_timeout_ms)
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable periodic health probes.
    pub enabled: bool,

    /// Probe interval in seconds.
    pub interval_secs: u64,

    /// Probe timeout in seconds.
    pub timeout_secs: u64,

    /// Path of the lightweight health endpoint.
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_secs: 3,
            path: "/api/health".to_string(),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure count at which the breaker opens.
    pub failure_threshold: u32,

    /// Seconds the breaker stays open before admitting a trial request.
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 25,
            cooldown_secs: 120,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Request throttling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Maximum simultaneously in-flight requests. A single slot favours
    /// stability over throughput on an unstable link.
    pub max_concurrent: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self { max_concurrent: 1 }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per logical request, the first one included.
    pub max_retries: u32,

    /// First backoff delay in milliseconds.
    pub base_delay_ms: u64,

    /// Backoff cap in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays.
    pub multiplier: f64,

    /// Jitter as a fraction of the delay (0.0 disables).
    pub jitter: f64,

    /// Minimum wait after a network-changed failure, in milliseconds.
    pub network_changed_floor_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 5000,
            max_delay_ms: 30_000,
            multiplier: 1.5,
            jitter: 0.0,
            network_changed_floor_ms: 8000,
        }
    }
}

/// Service credentials and session handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Requests must carry a valid session.
    pub required: bool,

    /// Service account identity.
    pub principal: Option<String>,

    /// Service account secret.
    #[serde(skip_serializing)]
    pub secret: Option<String>,

    /// Path of the credential authentication endpoint.
    pub login_path: String,

    /// Scheme prefixed to the token in the Authorization header. Empty sends
    /// the bare token.
    pub header_scheme: String,

    /// Delays between authentication retries in milliseconds.
    pub retry_delays_ms: Vec<u64>,

    /// Body fragments that mark a 403 as a session mismatch.
    pub mismatch_markers: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            required: false,
            principal: None,
            secret: None,
            login_path: "/api/admins/auth-with-password".to_string(),
            header_scheme: String::new(),
            retry_delays_ms: vec![2000, 4000, 8000],
            mismatch_markers: vec![
                "authorization mismatch".to_string(),
                "auth mismatch".to_string(),
                "invalid token".to_string(),
                "token expired".to_string(),
            ],
        }
    }
}

impl AuthConfig {
    /// True when both principal and secret are present.
    pub fn has_credentials(&self) -> bool {
        matches!(
            (&self.principal, &self.secret),
            (Some(p), Some(s)) if !p.is_empty() && !s.is_empty()
        )
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }
}

/// Timeout configuration for backend calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Per-attempt request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format: "pretty" or "json".
    pub log_format: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Capacity of the connectivity event channel.
    pub event_capacity: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9464".to_string(),
            event_capacity: 64,
        }
    }
}
