//! The connectivity service: owns and wires every component.
//!
//! # Responsibilities
//! - Build shared state, breaker, throttler, negotiator, monitor and auth
//!   from one `LinkConfig`
//! - Start and stop the background tasks
//! - Expose the client, the event stream and a status snapshot

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AuthSessionManager, MemorySessionStore, SessionStore};
use crate::config::LinkConfig;
use crate::error::Result;
use crate::events::{ConnectivityEvent, EventBus, Subscription};
use crate::health::{ConnectionSnapshot, ConnectionState, HealthMonitor};
use crate::http::{ClientParts, ResilientClient};
use crate::net::online::NetworkStatus;
use crate::net::protocol::{BackendTarget, Protocol, ProtocolNegotiator};
use crate::net::transport::{ReqwestTransport, Transport};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerStats};
use crate::resilience::throttle::RequestThrottler;

#[derive(Debug, Clone, Serialize)]
pub struct ThrottleStatus {
    pub max_concurrent: usize,
    pub in_flight: usize,
    pub queued: usize,
}

/// Point-in-time view of the whole layer.
#[derive(Debug, Clone, Serialize)]
pub struct LinkStatus {
    pub base_url: Option<String>,
    pub online: bool,
    pub connection: ConnectionSnapshot,
    pub circuit: CircuitBreakerStats,
    pub throttle: ThrottleStatus,
    pub authenticated: bool,
    pub monitor_running: bool,
}

pub struct ConnectivityService {
    state: Arc<ConnectionState>,
    network: NetworkStatus,
    events: EventBus,
    negotiator: Arc<ProtocolNegotiator>,
    breaker: Arc<CircuitBreaker>,
    throttler: Arc<RequestThrottler>,
    monitor: HealthMonitor,
    auth: Arc<AuthSessionManager>,
    client: ResilientClient,
    started: AtomicBool,
}

impl ConnectivityService {
    pub fn new(
        config: LinkConfig,
        transport: Arc<dyn Transport>,
        network: NetworkStatus,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let state = Arc::new(ConnectionState::new());
        let events = EventBus::new(config.observability.event_capacity);
        let target = BackendTarget::from_config(&config.backend, &config.protocol)?;
        let negotiator = Arc::new(ProtocolNegotiator::new(
            target,
            config.health_check.path.clone(),
            config.protocol.detect_timeout(),
            state.clone(),
            transport.clone(),
        ));
        let breaker = Arc::new(CircuitBreaker::new(&config.circuit_breaker, network.clone()));
        let throttler = Arc::new(RequestThrottler::new(
            config.throttle.max_concurrent,
            breaker.clone(),
        ));
        let monitor = HealthMonitor::new(
            config.health_check.clone(),
            negotiator.clone(),
            transport.clone(),
            state.clone(),
            events.clone(),
        );
        let auth = Arc::new(AuthSessionManager::new(
            config.auth.clone(),
            negotiator.clone(),
            transport.clone(),
            events.clone(),
            store,
            Duration::from_secs(config.timeouts.request_secs),
        ));
        let client = ResilientClient::new(
            &config,
            ClientParts {
                negotiator: negotiator.clone(),
                transport,
                state: state.clone(),
                breaker: breaker.clone(),
                throttler: throttler.clone(),
                auth: auth.clone(),
                events: events.clone(),
                network: network.clone(),
            },
        );

        Ok(Self {
            state,
            network,
            events,
            negotiator,
            breaker,
            throttler,
            monitor,
            auth,
            client,
            started: AtomicBool::new(false),
        })
    }

    /// Production wiring: reqwest transport, in-process session store.
    pub fn from_config(config: LinkConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(&config.timeouts)?);
        Self::new(
            config,
            transport,
            NetworkStatus::new(),
            Arc::new(MemorySessionStore::new()),
        )
    }

    /// Negotiate the protocol and start the background tasks. Repeated
    /// calls only return the current protocol.
    pub async fn start(&self) -> Protocol {
        if self.started.swap(true, Ordering::SeqCst) {
            return self.negotiator.current();
        }

        let before = self.negotiator.current();
        let protocol = self.negotiator.detect_protocol().await;
        if protocol != before {
            metrics::record_protocol_change();
            self.events
                .publish(ConnectivityEvent::ProtocolChanged { protocol });
        }

        self.monitor.start();
        self.auth.start();
        metrics::record_connected(self.state.is_connected());
        tracing::info!(%protocol, "Connectivity service started");
        protocol
    }

    /// Stop the background tasks. Safe to call any number of times.
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.monitor.stop();
        self.auth.stop();
        tracing::info!("Connectivity service stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn client(&self) -> ResilientClient {
        self.client.clone()
    }

    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Feed host link changes here.
    pub fn network(&self) -> &NetworkStatus {
        &self.network
    }

    pub fn negotiator(&self) -> &ProtocolNegotiator {
        &self.negotiator
    }

    pub fn auth(&self) -> &AuthSessionManager {
        &self.auth
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run one health probe now.
    pub async fn check_health(&self) -> bool {
        self.monitor.check().await
    }

    /// Forget the negotiated protocol and breaker history.
    pub fn reset_connection(&self) {
        self.state.reset();
        self.negotiator.reset();
        self.breaker.reset();
        tracing::info!("Connection state reset");
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            base_url: self.negotiator.base_url().ok().map(|u| u.to_string()),
            online: self.network.is_online(),
            connection: self.state.snapshot(),
            circuit: self.breaker.stats(),
            throttle: ThrottleStatus {
                max_concurrent: self.throttler.max_concurrent(),
                in_flight: self.throttler.in_flight(),
                queued: self.throttler.queued(),
            },
            authenticated: self.auth.is_authenticated(),
            monitor_running: self.monitor.is_running(),
        }
    }
}

impl Drop for ConnectivityService {
    fn drop(&mut self) {
        self.stop();
    }
}
