//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, timeouts > 0)
//! - Check URLs parse and credentials exist when required
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: LinkConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;
use url::Url;

use crate::config::schema::LinkConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &LinkConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.backend.host.trim().is_empty() && config.backend.base_url.is_none() {
        errors.push(ValidationError::new(
            "backend.host",
            "must be set when no base_url is configured",
        ));
    }
    check_url(&mut errors, "backend.base_url", config.backend.base_url.as_deref());
    check_url(&mut errors, "backend.proxy_url", config.backend.proxy_url.as_deref());

    if config.protocol.force_proxy && config.backend.proxy_url.is_none() {
        errors.push(ValidationError::new(
            "protocol.force_proxy",
            "requires backend.proxy_url",
        ));
    }
    if config.protocol.detect_timeout_ms == 0 {
        errors.push(ValidationError::new("protocol.detect_timeout_ms", "must be > 0"));
    }

    let health = &config.health_check;
    if health.interval_secs == 0 {
        errors.push(ValidationError::new("health_check.interval_secs", "must be > 0"));
    }
    if health.timeout_secs == 0 {
        errors.push(ValidationError::new("health_check.timeout_secs", "must be > 0"));
    }
    if !health.path.starts_with('/') {
        errors.push(ValidationError::new("health_check.path", "must start with '/'"));
    }

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be > 0",
        ));
    }
    if config.throttle.max_concurrent == 0 {
        errors.push(ValidationError::new("throttle.max_concurrent", "must be > 0"));
    }

    let retries = &config.retries;
    if retries.multiplier < 1.0 {
        errors.push(ValidationError::new("retries.multiplier", "must be >= 1.0"));
    }
    if retries.base_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }
    if !(0.0..1.0).contains(&retries.jitter) {
        errors.push(ValidationError::new("retries.jitter", "must be in [0, 1)"));
    }

    if config.timeouts.request_secs == 0 || config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts", "timeouts must be > 0"));
    }

    let auth = &config.auth;
    if auth.required && !auth.has_credentials() {
        errors.push(ValidationError::new(
            "auth.principal",
            "credentials are required when auth.required is set",
        ));
    }
    if !auth.login_path.starts_with('/') {
        errors.push(ValidationError::new("auth.login_path", "must start with '/'"));
    }

    if config.observability.event_capacity == 0 {
        errors.push(ValidationError::new(
            "observability.event_capacity",
            "must be > 0",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &'static str, value: Option<&str>) {
    let Some(raw) = value else { return };
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(field, e.to_string())),
    }
}
