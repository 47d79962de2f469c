//! Transport boundary.
//!
//! # Responsibilities
//! - Perform a single HTTP round trip with a deadline
//! - Read the full response body
//! - Assign a [`FailureKind`] to every failed round trip
//!
//! # Design Decisions
//! - No retries, no protocol decisions here; the client owns policy
//! - Error strings of the underlying stack are inspected only in
//!   [`classify_reqwest_error`]

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use std::error::Error as StdError;
use std::time::Duration;
use url::Url;

use crate::config::TimeoutConfig;
use crate::error::{FailureKind, LinkError, TransportError};
use crate::http::BackendResponse;

/// A fully addressed request for one attempt.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl TransportRequest {
    pub fn get(url: Url, timeout: Duration) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }
}

/// A single-shot HTTP transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Any HTTP status is `Ok`; `Err` means no response was received.
    async fn send(&self, request: TransportRequest) -> Result<BackendResponse, TransportError>;
}

/// Production transport on a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self, LinkError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .user_agent(concat!("plantops-link/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LinkError::InvalidRequest(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<BackendResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::new(classify_reqwest_error(&e), error_chain(&e)))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::new(classify_reqwest_error(&e), error_chain(&e)))?;

        Ok(BackendResponse {
            status,
            headers,
            body,
        })
    }
}

/// Map an opaque reqwest error onto the closed failure set.
pub fn classify_reqwest_error(err: &reqwest::Error) -> FailureKind {
    if let Some(kind) = classify_causes(err) {
        return kind;
    }
    if err.is_timeout() {
        FailureKind::Timeout
    } else if err.is_connect() {
        FailureKind::Connect
    } else {
        FailureKind::Other
    }
}

/// Inspect the causes of `err` but not `err` itself: reqwest's own message
/// embeds the request URL, and a path must never decide the category.
fn classify_causes(err: &(dyn StdError + 'static)) -> Option<FailureKind> {
    classify_message(&cause_chain(err).to_ascii_lowercase())
}

/// Message markers for the categories reqwest exposes no predicate for.
fn classify_message(message: &str) -> Option<FailureKind> {
    const TLS_MARKERS: &[&str] = &[
        "certificate",
        "tls",
        "ssl",
        "handshake",
        "wrong version number",
        "invalid peer",
    ];
    const NETWORK_CHANGED_MARKERS: &[&str] =
        &["network changed", "network_changed", "network is down", "network is unreachable"];

    if TLS_MARKERS.iter().any(|m| message.contains(m)) {
        Some(FailureKind::Tls)
    } else if NETWORK_CHANGED_MARKERS.iter().any(|m| message.contains(m)) {
        Some(FailureKind::NetworkChanged)
    } else {
        None
    }
}

fn cause_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = Vec::new();
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let causes = cause_chain(err);
    if causes.is_empty() {
        err.to_string()
    } else {
        format!("{}: {}", err, causes)
    }
}
