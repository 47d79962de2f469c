//! Session lifecycle against the backend.
//!
//! # Responsibilities
//! - Establish a session from configured service credentials
//! - Re-authenticate when connectivity is restored or the session is rejected
//! - Announce session changes and absorb changes made elsewhere
//!
//! # Design Decisions
//! - Login goes straight to the transport, never through the throttler, so a
//!   request waiting on a session cannot starve the login that would unblock it
//! - One login in flight at a time; concurrent callers share its result
//! - Readers never block: the session lives in an `ArcSwapOption`

use arc_swap::ArcSwapOption;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::session::{Session, SessionChange, SessionChangeKind, SessionStore};
use crate::config::AuthConfig;
use crate::error::{LinkError, Result};
use crate::events::{ConnectivityEvent, EventBus, Subscription};
use crate::net::protocol::ProtocolNegotiator;
use crate::net::transport::{Transport, TransportRequest};
use crate::observability::metrics;

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// Keeps a valid backend session available.
pub struct AuthSessionManager {
    inner: Arc<AuthInner>,
    running: Mutex<Option<Running>>,
}

struct AuthInner {
    config: AuthConfig,
    negotiator: Arc<ProtocolNegotiator>,
    transport: Arc<dyn Transport>,
    events: EventBus,
    store: Arc<dyn SessionStore>,
    origin: Uuid,
    session: ArcSwapOption<Session>,
    login: tokio::sync::Mutex<()>,
    request_timeout: Duration,
}

struct Running {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl AuthSessionManager {
    pub fn new(
        config: AuthConfig,
        negotiator: Arc<ProtocolNegotiator>,
        transport: Arc<dyn Transport>,
        events: EventBus,
        store: Arc<dyn SessionStore>,
        request_timeout: Duration,
    ) -> Self {
        // Adopt a session persisted by another context.
        let persisted = store.load().filter(|s| s.is_valid).map(Arc::new);
        Self {
            inner: Arc::new(AuthInner {
                config,
                negotiator,
                transport,
                events,
                store,
                origin: Uuid::new_v4(),
                session: ArcSwapOption::new(persisted),
                login: tokio::sync::Mutex::new(()),
                request_timeout,
            }),
            running: Mutex::new(None),
        }
    }

    /// Spawn the background task. Authenticates immediately when credentials
    /// exist and no valid session does. A second call is a no-op.
    pub fn start(&self) {
        let mut running = self.running.lock().expect("auth manager mutex poisoned");
        if running.is_some() {
            return;
        }

        let stop = CancellationToken::new();
        let token = stop.clone();
        let events = self.inner.events.subscribe();
        let changes = self.inner.store.subscribe();
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.run(token, events, changes).await });
        *running = Some(Running { stop, handle });
    }

    /// Stop the background task. Safe to call any number of times.
    pub fn stop(&self) {
        let running = self
            .running
            .lock()
            .expect("auth manager mutex poisoned")
            .take();
        if let Some(Running { stop, handle }) = running {
            stop.cancel();
            handle.abort();
            tracing::info!("Auth session manager stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .expect("auth manager mutex poisoned")
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Return the current session, authenticating first if there is none.
    pub async fn ensure_session(&self) -> Result<Arc<Session>> {
        self.inner.ensure_session().await
    }

    /// One login round trip, no retries.
    pub async fn authenticate(&self) -> Result<Arc<Session>> {
        self.inner.authenticate().await
    }

    /// Drop the current session after the backend rejected it.
    pub fn invalidate(&self) {
        self.inner.invalidate();
    }

    pub fn current(&self) -> Option<Arc<Session>> {
        self.inner.valid_session()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.valid_session().is_some()
    }

    pub fn is_required(&self) -> bool {
        self.inner.config.required
    }

    pub fn has_credentials(&self) -> bool {
        self.inner.config.has_credentials()
    }

    /// Header carrying the session token, if a session exists.
    pub fn authorization_header(&self) -> Option<(String, String)> {
        let session = self.inner.valid_session()?;
        let scheme = &self.inner.config.header_scheme;
        let value = if scheme.is_empty() {
            session.token.clone()
        } else {
            format!("{} {}", scheme, session.token)
        };
        Some(("authorization".to_string(), value))
    }
}

impl Drop for AuthSessionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl AuthInner {
    fn valid_session(&self) -> Option<Arc<Session>> {
        self.session.load_full().filter(|s| s.is_valid)
    }

    async fn ensure_session(&self) -> Result<Arc<Session>> {
        if let Some(session) = self.valid_session() {
            return Ok(session);
        }
        if !self.config.has_credentials() {
            return Err(LinkError::Authentication(
                "no service credentials configured".to_string(),
            ));
        }

        let _login = self.login.lock().await;
        // Another caller may have logged in while we waited.
        if let Some(session) = self.valid_session() {
            return Ok(session);
        }

        let delays = self.config.retry_delays();
        let mut attempt = 0usize;
        loop {
            match self.authenticate().await {
                Ok(session) => return Ok(session),
                Err(e) => {
                    let Some(delay) = delays.get(attempt).copied() else {
                        tracing::error!(attempts = attempt + 1, error = %e, "Authentication failed, giving up");
                        return Err(e);
                    };
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Authentication failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn authenticate(&self) -> Result<Arc<Session>> {
        let (Some(principal), Some(secret)) = (&self.config.principal, &self.config.secret) else {
            return Err(LinkError::Authentication(
                "no service credentials configured".to_string(),
            ));
        };

        let url = self.negotiator.url_for(&self.config.login_path, &[])?;
        let request = TransportRequest {
            method: Method::POST,
            url,
            headers: vec![("x-request-id".to_string(), Uuid::new_v4().to_string())],
            body: Some(json!({ "identity": principal, "password": secret })),
            timeout: self.request_timeout,
        };

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_auth_attempt("error");
                return Err(LinkError::Authentication(format!(
                    "login request failed: {}",
                    e.message
                )));
            }
        };
        if !response.is_success() {
            metrics::record_auth_attempt("rejected");
            return Err(LinkError::Authentication(format!(
                "login rejected with status {}",
                response.status
            )));
        }

        let token = match response.json::<LoginResponse>() {
            Ok(body) if !body.token.is_empty() => body.token,
            _ => {
                metrics::record_auth_attempt("error");
                return Err(LinkError::Authentication(
                    "login response carried no token".to_string(),
                ));
            }
        };

        let session = Arc::new(Session::new(token, principal.clone()));
        self.session.store(Some(session.clone()));
        self.store.publish(SessionChange {
            origin: self.origin,
            kind: SessionChangeKind::Established(Session::clone(&session)),
        });
        self.events
            .publish(ConnectivityEvent::AuthStateChanged { authenticated: true });
        metrics::record_auth_attempt("success");
        tracing::info!(principal = %principal, "Authenticated with backend");
        Ok(session)
    }

    fn invalidate(&self) {
        let previous = self.session.swap(None);
        tracing::warn!(had_session = previous.is_some(), "Session invalidated");
        if previous.is_some() {
            self.store.publish(SessionChange {
                origin: self.origin,
                kind: SessionChangeKind::Cleared,
            });
            self.events
                .publish(ConnectivityEvent::AuthStateChanged { authenticated: false });
        }
        self.events.publish(ConnectivityEvent::AuthInvalidated);
    }

    async fn reauthenticate(&self) {
        if !self.config.has_credentials() {
            return;
        }
        if let Err(e) = self.ensure_session().await {
            tracing::warn!(error = %e, "Background authentication failed");
        }
    }

    /// Adopt or clear a session changed by another context.
    fn absorb(&self, change: SessionChange) {
        if change.origin == self.origin {
            return;
        }
        match change.kind {
            SessionChangeKind::Established(session) => {
                tracing::debug!(principal = %session.principal, "Adopting session from another context");
                self.session.store(Some(Arc::new(session)));
                self.events
                    .publish(ConnectivityEvent::AuthStateChanged { authenticated: true });
            }
            SessionChangeKind::Cleared => {
                if self.session.swap(None).is_some() {
                    tracing::debug!("Session cleared by another context");
                    self.events
                        .publish(ConnectivityEvent::AuthStateChanged { authenticated: false });
                }
            }
        }
    }

    async fn run(
        &self,
        stop: CancellationToken,
        mut events: Subscription,
        mut changes: broadcast::Receiver<SessionChange>,
    ) {
        tracing::info!("Auth session manager starting");
        self.reauthenticate().await;

        let mut changes_open = true;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                event = events.recv() => match event {
                    Some(ConnectivityEvent::Restored) | Some(ConnectivityEvent::AuthInvalidated) => {
                        self.reauthenticate().await;
                    }
                    Some(_) => {}
                    None => break,
                },
                change = changes.recv(), if changes_open => match change {
                    Ok(change) => self.absorb(change),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Session change subscriber lagged");
                    }
                    Err(RecvError::Closed) => changes_open = false,
                },
            }
        }
    }
}
