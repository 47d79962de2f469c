//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe the backend health endpoint
//! - Update connection state based on results
//! - Publish Restored/Lost only on transitions

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::HealthCheckConfig;
use crate::events::EventBus;
use crate::health::state::ConnectionState;
use crate::health::publish_edge;
use crate::net::protocol::ProtocolNegotiator;
use crate::net::transport::{Transport, TransportRequest};
use crate::observability::metrics;

/// Periodic backend probe.
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
    running: Mutex<Option<Running>>,
}

struct MonitorInner {
    config: HealthCheckConfig,
    negotiator: Arc<ProtocolNegotiator>,
    transport: Arc<dyn Transport>,
    state: Arc<ConnectionState>,
    events: EventBus,
}

struct Running {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthCheckConfig,
        negotiator: Arc<ProtocolNegotiator>,
        transport: Arc<dyn Transport>,
        state: Arc<ConnectionState>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                negotiator,
                transport,
                state,
                events,
            }),
            running: Mutex::new(None),
        }
    }

    /// Spawn the probe loop. A second call while running is a no-op.
    pub fn start(&self) {
        if !self.inner.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }
        let mut running = self.running.lock().expect("health monitor mutex poisoned");
        if running.is_some() {
            tracing::debug!("Health monitor already running");
            return;
        }

        let stop = CancellationToken::new();
        let inner = self.inner.clone();
        let token = stop.clone();
        let handle = tokio::spawn(async move { inner.run(token).await });
        *running = Some(Running { stop, handle });
    }

    /// Cancel the probe loop. Safe to call any number of times.
    pub fn stop(&self) {
        let running = self
            .running
            .lock()
            .expect("health monitor mutex poisoned")
            .take();
        if let Some(Running { stop, handle }) = running {
            stop.cancel();
            handle.abort();
            tracing::info!("Health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .expect("health monitor mutex poisoned")
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Run one probe now and record its outcome.
    pub async fn check(&self) -> bool {
        self.inner.check().await
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl MonitorInner {
    async fn run(&self, stop: CancellationToken) {
        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check().await;
                }
                _ = stop.cancelled() => {
                    tracing::info!("Health monitor stopping");
                    break;
                }
            }
        }
    }

    async fn check(&self) -> bool {
        let url = match self.negotiator.url_for(&self.config.path, &[]) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build health check URL");
                return false;
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let mut request = TransportRequest::get(url, timeout);
        request
            .headers
            .push(("user-agent".into(), "plantops-link-health-check".into()));

        let healthy = match self.transport.send(request).await {
            Ok(response) if response.is_success() => true,
            Ok(response) => {
                tracing::warn!(status = response.status, "Health check failed: non-success status");
                false
            }
            Err(e) => {
                tracing::warn!(failure = e.kind.as_str(), error = %e.message, "Health check failed");
                false
            }
        };

        let edge = if healthy {
            self.state.record_success()
        } else {
            self.state.record_failure()
        };
        publish_edge(&self.events, edge);
        metrics::record_connected(self.state.is_connected());

        healthy
    }
}
