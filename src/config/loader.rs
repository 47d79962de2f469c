//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::LinkConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, override from the environment, and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<LinkConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: LinkConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Defaults plus environment overrides, validated. Used when no file is given.
pub fn load_from_env() -> Result<LinkConfig, ConfigError> {
    let mut config = LinkConfig::default();
    apply_env_overrides(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply `PLANTOPS_*` environment variables on top of a parsed config.
pub fn apply_env_overrides(config: &mut LinkConfig) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Apply overrides from an arbitrary lookup.
pub fn apply_overrides_from<F>(config: &mut LinkConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("PLANTOPS_BACKEND_HOST") {
        config.backend.host = host;
    }
    if let Some(url) = lookup("PLANTOPS_BASE_URL") {
        config.backend.base_url = Some(url).filter(|u| !u.is_empty());
    }
    if let Some(flag) = lookup("PLANTOPS_FORCE_HTTP").and_then(|v| parse_flag(&v)) {
        config.protocol.force_plain = flag;
    }
    if let Some(flag) = lookup("PLANTOPS_FORCE_PROXY").and_then(|v| parse_flag(&v)) {
        config.protocol.force_proxy = flag;
    }
    if let Some(flag) = lookup("PLANTOPS_AUTH_REQUIRED").and_then(|v| parse_flag(&v)) {
        config.auth.required = flag;
    }
    if let Some(principal) = lookup("PLANTOPS_AUTH_PRINCIPAL") {
        config.auth.principal = Some(principal);
    }
    if let Some(secret) = lookup("PLANTOPS_AUTH_SECRET") {
        config.auth.secret = Some(secret);
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            tracing::warn!(value = %other, "Ignoring unrecognised boolean override");
            None
        }
    }
}
