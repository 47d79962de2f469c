//! Scripted transport for unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{FailureKind, TransportError};
use crate::http::BackendResponse;
use crate::net::transport::{Transport, TransportRequest};

pub(crate) type Reply = Result<BackendResponse, TransportError>;

/// Replies per URL path first, then from the shared queue, then the fallback.
pub(crate) struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    queue: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    delay: Option<Duration>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new(fallback: Reply) -> Arc<Self> {
        Arc::new(Self::build(fallback, None))
    }

    pub(crate) fn with_delay(fallback: Reply, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(fallback, Some(delay)))
    }

    fn build(fallback: Reply, delay: Option<Duration>) -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            fallback,
            delay,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn ok(status: u16, body: &str) -> Reply {
        Ok(BackendResponse::new(status, body))
    }

    pub(crate) fn fail(kind: FailureKind) -> Reply {
        Err(TransportError::new(kind, format!("scripted {}", kind.as_str())))
    }

    pub(crate) fn push(&self, reply: Reply) {
        self.queue.lock().unwrap().push_back(reply);
    }

    pub(crate) fn on(&self, path: &str, reply: Reply) {
        self.routes
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn calls_to(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == path)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<BackendResponse, TransportError> {
        let path = request.url.path().to_string();
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let routed = self
            .routes
            .lock()
            .unwrap()
            .get_mut(&path)
            .and_then(VecDeque::pop_front);
        routed
            .or_else(|| self.queue.lock().unwrap().pop_front())
            .unwrap_or_else(|| self.fallback.clone())
    }
}
