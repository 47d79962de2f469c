//! Resilient request execution.
//!
//! # Responsibilities
//! - Run one logical request to completion or to a classified error
//! - Apply protocol fallback, network-changed waits and backoff retries
//! - Report every attempt to the circuit breaker and connection state
//!
//! # Attempt Loop
//! ```text
//! ensure_session (when required)
//!     → throttle slot (held until the request settles)
//!     → per attempt: breaker permit → URL from negotiator → transport
//!     → classify:
//!         Protocol        → fall back to plain once, retry immediately
//!         NetworkChanged  → wait for online (floor delay), then back off
//!         Transient       → back off until attempts are exhausted
//!         AuthMismatch    → invalidate session, surface
//!         Rejected        → surface
//! ```
//!
//! # Design Decisions
//! - Any HTTP answer below 500 (408 and 429 excepted) counts as a breaker
//!   success: the link works even when the backend refuses the request
//! - Cancellation drops the slot and permit guards, so nothing leaks

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::auth::AuthSessionManager;
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::events::{ConnectivityEvent, EventBus};
use crate::health::{publish_edge, ConnectionState};
use crate::http::request::BackendRequest;
use crate::http::response::BackendResponse;
use crate::net::online::NetworkStatus;
use crate::net::protocol::{Protocol, ProtocolNegotiator};
use crate::net::transport::{Transport, TransportRequest};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::retries::{classify_response, classify_transport, Failure, RetryPolicy};
use crate::resilience::throttle::RequestThrottler;
use crate::resilience::timeouts::Deadline;

/// Shared components the client drives.
#[derive(Clone)]
pub struct ClientParts {
    pub negotiator: Arc<ProtocolNegotiator>,
    pub transport: Arc<dyn Transport>,
    pub state: Arc<ConnectionState>,
    pub breaker: Arc<CircuitBreaker>,
    pub throttler: Arc<RequestThrottler>,
    pub auth: Arc<AuthSessionManager>,
    pub events: EventBus,
    pub network: NetworkStatus,
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub cancel: Option<CancellationToken>,
    /// Overall budget for the logical request, waits included.
    pub deadline: Option<Duration>,
    pub retry_policy: Option<RetryPolicy>,
}

impl RequestOptions {
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

/// Cheap to clone; all clones share the same breaker, throttle and session.
#[derive(Clone)]
pub struct ResilientClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    parts: ClientParts,
    policy: RetryPolicy,
    request_timeout: Duration,
    mismatch_markers: Vec<String>,
}

/// Outcome of one attempt.
enum Attempt {
    Done(BackendResponse),
    Failed(Failure),
}

impl ResilientClient {
    pub fn new(config: &LinkConfig, parts: ClientParts) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                parts,
                policy: RetryPolicy::from_config(&config.retries),
                request_timeout: Duration::from_secs(config.timeouts.request_secs),
                mismatch_markers: config.auth.mismatch_markers.clone(),
            }),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    pub async fn execute(&self, request: BackendRequest) -> Result<BackendResponse> {
        self.execute_with(request, RequestOptions::default()).await
    }

    pub async fn execute_with(
        &self,
        request: BackendRequest,
        options: RequestOptions,
    ) -> Result<BackendResponse> {
        let started = Instant::now();
        let method = request.method.to_string();
        let span = tracing::info_span!(
            "backend_request",
            request_id = %request.id,
            method = %request.method,
            path = %request.path
        );

        let result = self.inner.run(request, options).instrument(span).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.label(),
        };
        metrics::record_request(&method, outcome, started.elapsed());
        result
    }

    pub async fn get(&self, path: &str) -> Result<BackendResponse> {
        self.execute(BackendRequest::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<BackendResponse> {
        self.execute(BackendRequest::post(path, body)).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> Result<BackendResponse> {
        self.execute(BackendRequest::patch(path, body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<BackendResponse> {
        self.execute(BackendRequest::delete(path)).await
    }

    /// GET and deserialize the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get(path).await?.json()
    }
}

impl ClientInner {
    async fn run(&self, request: BackendRequest, options: RequestOptions) -> Result<BackendResponse> {
        let deadline = Deadline::new(options.cancel.unwrap_or_default(), options.deadline);
        let policy = options.retry_policy.unwrap_or_else(|| self.policy.clone());
        let parts = &self.parts;

        if parts.auth.is_required() {
            deadline.run(parts.auth.ensure_session()).await??;
        }

        let ticket = parts.throttler.ticket(request.id);
        let _slot = deadline
            .run(parts.throttler.acquire(ticket, deadline.token()))
            .await??;

        // Forced plain must never go out over a secure URL.
        if parts.negotiator.is_forced_plain() && parts.negotiator.current() == Protocol::Secure {
            self.fall_back();
        }

        let mut backoff = policy.backoff();
        let mut fell_back = false;
        let mut attempts = 0u32;

        loop {
            deadline.check()?;
            attempts += 1;

            let tls_recoverable = !fell_back && parts.negotiator.can_fall_back();
            let failure = match self.attempt(&request, &deadline, tls_recoverable).await? {
                Attempt::Done(response) => {
                    if attempts > 1 {
                        tracing::info!(attempts, "Request succeeded after retry");
                    }
                    return Ok(response);
                }
                Attempt::Failed(failure) => failure,
            };

            match failure {
                Failure::Protocol(ref message) => {
                    if !tls_recoverable {
                        tracing::error!(error = %message, "TLS failure with no protocol fallback left");
                        return Err(self.connection_failed(failure.into_error(attempts)));
                    }
                    fell_back = true;
                    metrics::record_retry("protocol");
                    tracing::warn!(error = %message, "TLS failure, retrying over plain transport");
                    self.fall_back();
                }
                Failure::NetworkChanged(ref message) | Failure::Transient(ref message) => {
                    let retries_used = backoff.attempts();
                    if retries_used + 1 >= policy.max_attempts() {
                        tracing::error!(attempts, error = %message, "Retries exhausted");
                        return Err(self.connection_failed(failure.into_error(attempts)));
                    }

                    let delay = backoff.next_delay();
                    metrics::record_retry(failure.reason());
                    if matches!(failure, Failure::NetworkChanged(_)) {
                        let wait = delay.max(policy.network_changed_floor);
                        tracing::warn!(
                            attempt = attempts,
                            wait_ms = wait.as_millis() as u64,
                            error = %message,
                            "Network changed, waiting before retry"
                        );
                        self.wait_for_network(wait, policy.max_delay, &deadline).await?;
                    } else {
                        tracing::warn!(
                            attempt = attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "Transient failure, backing off"
                        );
                        deadline.sleep(delay).await?;
                    }
                }
                Failure::AuthMismatch => {
                    tracing::warn!("Backend rejected the session");
                    parts.auth.invalidate();
                    return Err(failure.into_error(attempts));
                }
                rejected @ Failure::Rejected { .. } => {
                    return Err(rejected.into_error(attempts));
                }
            }
        }
    }

    /// One round trip under a breaker permit. A TLS failure that the plain
    /// fallback will retry is not recorded as lost connectivity.
    async fn attempt(
        &self,
        request: &BackendRequest,
        deadline: &Deadline,
        tls_recoverable: bool,
    ) -> Result<Attempt> {
        let parts = &self.parts;
        let permit = parts.breaker.try_acquire()?;
        let url = parts.negotiator.url_for(&request.path, &request.query)?;

        let mut headers = Vec::with_capacity(request.headers.len() + 2);
        headers.push(("x-request-id".to_string(), request.id.to_string()));
        if let Some(auth) = parts.auth.authorization_header() {
            headers.push(auth);
        }
        headers.extend(request.headers.iter().cloned());

        let outbound = TransportRequest {
            method: request.method.clone(),
            url,
            headers,
            body: request.body.clone(),
            timeout: deadline.clamp(self.request_timeout),
        };
        tracing::debug!(url = %outbound.url, "Dispatching attempt");

        // A cancelled send drops the permit, which re-arms a half-open trial.
        let sent = deadline.run(parts.transport.send(outbound)).await?;

        match sent {
            Ok(response) => {
                let failure = classify_response(&response, &self.mismatch_markers);
                match &failure {
                    Some(f) if f.is_network() => permit.failure(),
                    _ => permit.success(),
                }
                publish_edge(&parts.events, parts.state.record_success());
                metrics::record_connected(true);
                Ok(match failure {
                    None => Attempt::Done(response),
                    Some(f) => Attempt::Failed(f),
                })
            }
            Err(e) => {
                permit.failure();
                let failure = classify_transport(&e);
                if !(tls_recoverable && matches!(failure, Failure::Protocol(_))) {
                    publish_edge(&parts.events, parts.state.record_failure());
                    metrics::record_connected(parts.state.is_connected());
                }
                Ok(Attempt::Failed(failure))
            }
        }
    }

    fn fall_back(&self) {
        if self.parts.negotiator.fallback_to_plain() {
            metrics::record_protocol_change();
            self.parts.events.publish(ConnectivityEvent::ProtocolChanged {
                protocol: Protocol::Plain,
            });
        }
    }

    /// Wait out a host link change: at least `wait`, then until the host
    /// reports online, bounded by the backoff cap.
    async fn wait_for_network(&self, wait: Duration, cap: Duration, deadline: &Deadline) -> Result<()> {
        deadline.sleep(wait).await?;
        let network = &self.parts.network;
        if !network.is_online() {
            tracing::info!("Host offline, waiting for network");
            if !deadline.run(network.wait_online(cap)).await? {
                tracing::warn!("Host still offline after network change");
            }
        }
        Ok(())
    }

    fn connection_failed(&self, error: LinkError) -> LinkError {
        self.parts.events.publish(ConnectivityEvent::ConnectionFailed);
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemorySessionStore;
    use crate::error::FailureKind;
    use crate::events::Subscription;
    use crate::net::protocol::BackendTarget;
    use crate::net::scripted::ScriptedTransport;
    use crate::resilience::circuit_breaker::CircuitState;

    struct Harness {
        client: ResilientClient,
        transport: Arc<ScriptedTransport>,
        breaker: Arc<CircuitBreaker>,
        state: Arc<ConnectionState>,
        network: NetworkStatus,
        auth: Arc<AuthSessionManager>,
        events: Subscription,
    }

    fn harness(config: LinkConfig, transport: Arc<ScriptedTransport>) -> Harness {
        let state = Arc::new(ConnectionState::new());
        let network = NetworkStatus::new();
        let events = EventBus::new(64);
        let target = BackendTarget::from_config(&config.backend, &config.protocol).unwrap();
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
        let auth = Arc::new(AuthSessionManager::new(
            config.auth.clone(),
            negotiator.clone(),
            transport.clone(),
            events.clone(),
            Arc::new(MemorySessionStore::new()),
            Duration::from_secs(5),
        ));
        let subscription = events.subscribe();
        let client = ResilientClient::new(
            &config,
            ClientParts {
                negotiator,
                transport: transport.clone(),
                state: state.clone(),
                breaker: breaker.clone(),
                throttler,
                auth: auth.clone(),
                events,
                network: network.clone(),
            },
        );
        Harness {
            client,
            transport,
            breaker,
            state,
            network,
            auth,
            events: subscription,
        }
    }

    fn ok(body: &str) -> crate::net::scripted::Reply {
        ScriptedTransport::ok(200, body)
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let transport = ScriptedTransport::new(ok(r#"{"items":[]}"#));
        let h = harness(LinkConfig::default(), transport);
        let request = BackendRequest::get("/api/collections/tanks/records").with_query("page", "1");
        let id = request.id;

        let response = h.client.execute(request).await.unwrap();
        assert_eq!(response.status, 200);

        let sent = h.transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].url.as_str(),
            "https://localhost:8090/api/collections/tanks/records?page=1"
        );
        assert!(sent[0]
            .headers
            .contains(&("x-request-id".to_string(), id.to_string())));
        assert_eq!(h.breaker.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_retries_with_backoff() {
        let transport = ScriptedTransport::new(ok("{}"));
        transport.push(ScriptedTransport::fail(FailureKind::Timeout));
        transport.push(ScriptedTransport::ok(503, "busy"));
        let h = harness(LinkConfig::default(), transport);

        let started = tokio::time::Instant::now();
        let response = h.client.get("/api/items").await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(h.transport.requests().len(), 3);
        // 5s then 7.5s.
        assert_eq!(started.elapsed(), Duration::from_millis(12_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries() {
        let transport = ScriptedTransport::new(ScriptedTransport::fail(FailureKind::Connect));
        let mut h = harness(LinkConfig::default(), transport);

        let err = h.client.get("/api/items").await.unwrap_err();
        match err {
            LinkError::ExhaustedRetries { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.transport.requests().len(), 3);
        assert_eq!(h.breaker.failure_count(), 3);
        assert!(!h.state.is_connected());

        let events = h.events.drain();
        assert_eq!(
            events,
            vec![ConnectivityEvent::Lost, ConnectivityEvent::ConnectionFailed]
        );
    }

    #[tokio::test]
    async fn test_tls_failure_falls_back_once() {
        let transport = ScriptedTransport::new(ok("{}"));
        transport.push(ScriptedTransport::fail(FailureKind::Tls));
        let mut h = harness(LinkConfig::default(), transport);

        let response = h.client.get("/api/items").await.unwrap();
        assert_eq!(response.status, 200);

        let urls: Vec<String> = h
            .transport
            .requests()
            .iter()
            .map(|r| r.url.scheme().to_string())
            .collect();
        assert_eq!(urls, vec!["https", "http"]);
        assert_eq!(h.state.protocol(), Protocol::Plain);

        // The recovered TLS failure never shows up as lost connectivity.
        assert_eq!(
            h.events.drain(),
            vec![ConnectivityEvent::ProtocolChanged { protocol: Protocol::Plain }]
        );
        assert!(h.state.is_connected());
        assert_eq!(h.state.consecutive_failures(), 0);

        // Sticky for the next request.
        h.client.get("/api/items").await.unwrap();
        assert_eq!(h.transport.requests()[2].url.scheme(), "http");
    }

    #[tokio::test]
    async fn test_second_tls_failure_surfaces() {
        let transport = ScriptedTransport::new(ScriptedTransport::fail(FailureKind::Tls));
        let mut h = harness(LinkConfig::default(), transport);

        let err = h.client.get("/api/items").await.unwrap_err();
        assert!(matches!(err, LinkError::Protocol(_)));
        assert_eq!(h.transport.requests().len(), 2);
        assert!(!h.state.is_connected());
        assert_eq!(
            h.events.drain(),
            vec![
                ConnectivityEvent::ProtocolChanged { protocol: Protocol::Plain },
                ConnectivityEvent::Lost,
                ConnectivityEvent::ConnectionFailed,
            ]
        );
    }

    #[tokio::test]
    async fn test_forced_plain_never_uses_secure_url() {
        let transport = ScriptedTransport::new(ok("{}"));
        let mut config = LinkConfig::default();
        config.protocol.force_plain = true;
        let h = harness(config, transport);
        h.state.reset();

        h.client.get("/api/items").await.unwrap();
        assert_eq!(h.transport.requests()[0].url.scheme(), "http");
    }

    #[tokio::test]
    async fn test_auth_mismatch_invalidates_without_retry() {
        let transport = ScriptedTransport::new(ScriptedTransport::ok(
            403,
            r#"{"message":"Authorization mismatch"}"#,
        ));
        transport.on(
            "/api/admins/auth-with-password",
            ScriptedTransport::ok(200, r#"{"token":"abc"}"#),
        );
        let mut config = LinkConfig::default();
        config.auth.required = true;
        config.auth.principal = Some("svc".to_string());
        config.auth.secret = Some("pw".to_string());
        let mut h = harness(config, transport);

        let err = h.client.get("/api/items").await.unwrap_err();
        assert!(matches!(err, LinkError::AuthMismatch));
        assert!(!h.auth.is_authenticated());
        assert_eq!(h.transport.calls_to("/api/items"), 1);
        assert_eq!(h.breaker.failure_count(), 0);

        let sent = h.transport.requests();
        let data = sent.iter().find(|r| r.url.path() == "/api/items").unwrap();
        assert!(data
            .headers
            .contains(&("authorization".to_string(), "abc".to_string())));
        assert!(h.events.drain().contains(&ConnectivityEvent::AuthInvalidated));
    }

    #[tokio::test]
    async fn test_rejected_is_not_retried() {
        let transport = ScriptedTransport::new(ScriptedTransport::ok(404, "missing"));
        let h = harness(LinkConfig::default(), transport);

        let err = h.client.get("/api/items/nope").await.unwrap_err();
        assert!(matches!(err, LinkError::Rejected { status: 404, .. }));
        assert_eq!(h.transport.requests().len(), 1);
        assert!(h.state.is_connected());
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast() {
        let transport = ScriptedTransport::new(ok("{}"));
        let h = harness(LinkConfig::default(), transport);
        for _ in 0..25 {
            h.breaker.record_failure();
        }
        assert_eq!(h.breaker.state(), CircuitState::Open);

        let err = h.client.get("/api/items").await.unwrap_err();
        assert!(matches!(err, LinkError::CircuitOpen { .. }));
        assert!(h.transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_changed_waits_for_floor() {
        let transport = ScriptedTransport::new(ok("{}"));
        transport.push(ScriptedTransport::fail(FailureKind::NetworkChanged));
        let h = harness(LinkConfig::default(), transport);

        let started = tokio::time::Instant::now();
        h.client.get("/api/items").await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_changed_waits_for_online() {
        let transport = ScriptedTransport::new(ok("{}"));
        transport.push(ScriptedTransport::fail(FailureKind::NetworkChanged));
        let h = harness(LinkConfig::default(), transport);

        let network = h.network.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            network.set_online(false);
            tokio::time::sleep(Duration::from_secs(11)).await;
            network.set_online(true);
        });

        let started = tokio::time::Instant::now();
        h.client.get("/api/items").await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(12));
        assert_eq!(h.transport.requests().len(), 2);
        assert_eq!(h.breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_backoff() {
        let transport = ScriptedTransport::new(ScriptedTransport::fail(FailureKind::Connect));
        let h = harness(LinkConfig::default(), transport);

        let options = RequestOptions::default().with_deadline(Duration::from_secs(2));
        let err = h
            .client
            .execute_with(BackendRequest::get("/api/items"), options)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Cancelled));
        assert_eq!(h.transport.requests().len(), 1);

        // The slot was released.
        let response = h
            .client
            .execute_with(
                BackendRequest::get("/api/items"),
                RequestOptions::default().with_retry_policy(RetryPolicy::default().with_max_retries(1)),
            )
            .await;
        assert!(matches!(response, Err(LinkError::ExhaustedRetries { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn test_cancel_while_queued_releases_slot() {
        let transport = ScriptedTransport::with_delay(ok("{}"), Duration::from_millis(50));
        let h = harness(LinkConfig::default(), transport);

        let first = tokio::spawn({
            let client = h.client.clone();
            async move { client.get("/api/first").await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let cancel = CancellationToken::new();
        let queued = tokio::spawn({
            let client = h.client.clone();
            let cancel = cancel.clone();
            async move {
                client
                    .execute_with(
                        BackendRequest::get("/api/second"),
                        RequestOptions::default().with_cancel(cancel),
                    )
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        cancel.cancel();

        assert!(matches!(queued.await.unwrap(), Err(LinkError::Cancelled)));
        assert!(first.await.unwrap().is_ok());
        assert!(h.client.get("/api/third").await.is_ok());
        assert_eq!(h.transport.calls_to("/api/second"), 0);
    }
}
