//! Protocol negotiation.
//!
//! # Decision order
//! ```text
//! absolute base_url configured   → its scheme, no probe
//! force_proxy                    → proxy URL scheme, no probe
//! force_plain                    → Plain, no probe
//! protocol persisted earlier     → persisted value
//! probe https://host/api/health  → Secure
//!   TLS-class failure            → probe http://host/api/health
//!     answered                   → Plain (persisted)
//!     failed                     → Secure (unverified)
//! ```
//!
//! Once a request needed plain transport the choice sticks until
//! [`ProtocolNegotiator::reset`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::{BackendConfig, ProtocolConfig};
use crate::error::{FailureKind, LinkError, Result};
use crate::health::state::ConnectionState;
use crate::net::transport::{Transport, TransportRequest};

/// Transport security used to reach the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Secure,
    Plain,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Secure => "https",
            Protocol::Plain => "http",
        }
    }

    fn from_url(url: &Url) -> Self {
        if url.scheme() == "https" {
            Protocol::Secure
        } else {
            Protocol::Plain
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Where requests are addressed, derived from configuration.
#[derive(Debug, Clone)]
pub struct BackendTarget {
    pub host: String,
    pub base_url: Option<Url>,
    pub proxy_url: Option<Url>,
    pub require_https: bool,
    pub force_plain: bool,
    pub force_proxy: bool,
}

impl BackendTarget {
    pub fn from_config(backend: &BackendConfig, protocol: &ProtocolConfig) -> Result<Self> {
        let parse = |raw: &Option<String>| -> Result<Option<Url>> {
            raw.as_deref()
                .map(|s| Url::parse(s).map_err(|e| LinkError::InvalidRequest(format!("{}: {}", s, e))))
                .transpose()
        };
        Ok(Self {
            host: backend.host.trim_end_matches('/').to_string(),
            base_url: parse(&backend.base_url)?,
            proxy_url: parse(&backend.proxy_url)?,
            require_https: backend.require_https,
            force_plain: protocol.force_plain,
            force_proxy: protocol.force_proxy,
        })
    }
}

/// Chooses secure or plain transport and builds request URLs.
pub struct ProtocolNegotiator {
    target: BackendTarget,
    health_path: String,
    detect_timeout: Duration,
    state: Arc<ConnectionState>,
    transport: Arc<dyn Transport>,
}

impl ProtocolNegotiator {
    pub fn new(
        target: BackendTarget,
        health_path: impl Into<String>,
        detect_timeout: Duration,
        state: Arc<ConnectionState>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let negotiator = Self {
            target,
            health_path: health_path.into(),
            detect_timeout,
            state,
            transport,
        };
        if let Some(protocol) = negotiator.override_protocol() {
            negotiator.state.set_protocol(protocol, false);
        }
        negotiator
    }

    /// Protocol fixed by configuration, if any.
    pub fn override_protocol(&self) -> Option<Protocol> {
        if let Some(url) = &self.target.base_url {
            return Some(Protocol::from_url(url));
        }
        if self.target.force_proxy {
            if let Some(url) = &self.target.proxy_url {
                return Some(Protocol::from_url(url));
            }
        }
        if self.target.force_plain {
            return Some(Protocol::Plain);
        }
        None
    }

    pub fn is_forced_plain(&self) -> bool {
        self.target.force_plain && self.target.base_url.is_none() && !self.target.force_proxy
    }

    /// Decide which protocol to use; probes only when nothing is fixed.
    pub async fn detect_protocol(&self) -> Protocol {
        if let Some(protocol) = self.override_protocol() {
            tracing::debug!(%protocol, "Protocol fixed by configuration");
            self.state.set_protocol(protocol, false);
            return protocol;
        }
        if self.state.is_protocol_persisted() {
            return self.state.protocol();
        }

        let chosen = match self.probe(Protocol::Secure).await {
            Ok(()) => Protocol::Secure,
            Err(FailureKind::Tls) => {
                tracing::warn!(host = %self.target.host, "Secure probe failed with TLS error, trying plain");
                match self.probe(Protocol::Plain).await {
                    Ok(()) => Protocol::Plain,
                    Err(kind) => {
                        tracing::warn!(failure = kind.as_str(), "Plain probe failed, defaulting to secure");
                        Protocol::Secure
                    }
                }
            }
            Err(kind) => {
                tracing::warn!(failure = kind.as_str(), "Secure probe failed, keeping secure");
                Protocol::Secure
            }
        };

        self.state.set_protocol(chosen, chosen == Protocol::Plain);
        tracing::info!(protocol = %chosen, host = %self.target.host, "Protocol negotiated");
        chosen
    }

    async fn probe(&self, protocol: Protocol) -> std::result::Result<(), FailureKind> {
        let url = self
            .direct_url(protocol, &self.health_path)
            .map_err(|_| FailureKind::Other)?;
        self.transport
            .send(TransportRequest::get(url, self.detect_timeout))
            .await
            .map(|_| ())
            .map_err(|e| e.kind)
    }

    pub fn current(&self) -> Protocol {
        self.state.protocol()
    }

    /// Persist plain transport after a TLS-class failure.
    ///
    /// Returns true if the protocol actually changed. Configuration-fixed
    /// targets cannot fall back.
    pub fn fallback_to_plain(&self) -> bool {
        if !self.can_fall_back() {
            return false;
        }
        let changed = self.state.set_protocol(Protocol::Plain, true);
        if changed {
            tracing::warn!(host = %self.target.host, "Falling back to plain transport");
        }
        changed
    }

    /// False when configuration pins the URL (absolute base URL or proxy).
    pub fn can_fall_back(&self) -> bool {
        self.target.base_url.is_none() && !self.target.force_proxy
    }

    /// Forget any persisted protocol.
    pub fn reset(&self) {
        let protocol = self.override_protocol().unwrap_or(Protocol::Secure);
        self.state.set_protocol(protocol, false);
    }

    /// Base URL requests are addressed to under the current protocol.
    pub fn base_url(&self) -> Result<Url> {
        if let Some(url) = &self.target.base_url {
            return Ok(url.clone());
        }
        if let Some(proxy) = &self.target.proxy_url {
            // Plain transport is never exposed to an HTTPS deployment.
            let via_proxy = self.target.force_proxy
                || (self.target.require_https && self.current() == Protocol::Plain);
            if via_proxy {
                return Ok(proxy.clone());
            }
        }
        self.direct_base(self.current())
    }

    /// Full URL for a request path plus query.
    pub fn url_for(&self, path: &str, query: &[(String, String)]) -> Result<Url> {
        let mut url = join(&self.base_url()?, path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        Ok(url)
    }

    fn direct_base(&self, protocol: Protocol) -> Result<Url> {
        let raw = format!("{}://{}", protocol.scheme(), self.target.host);
        Url::parse(&raw).map_err(|e| LinkError::InvalidRequest(format!("{}: {}", raw, e)))
    }

    fn direct_url(&self, protocol: Protocol, path: &str) -> Result<Url> {
        join(&self.direct_base(protocol)?, path)
    }
}

fn join(base: &Url, path: &str) -> Result<Url> {
    let raw = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&raw).map_err(|e| LinkError::InvalidRequest(format!("{}: {}", raw, e)))
}
