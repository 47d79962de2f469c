//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use plantops_link::auth::MemorySessionStore;
use plantops_link::net::TransportRequest;
use plantops_link::{
    BackendResponse, ConnectivityService, FailureKind, LinkConfig, NetworkStatus, Transport,
    TransportError,
};

/// Method and path of a request received by the mock backend.
#[derive(Debug, Clone)]
pub struct Received {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Start a programmable mock backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(Received) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        handle_connection(socket, f).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

async fn handle_connection<F, Fut>(mut socket: TcpStream, f: Arc<F>)
where
    F: Fn(Received) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let Some(received) = read_request(&mut socket).await else {
        return;
    };
    let (status, body) = f(received).await;
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason(status),
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> Option<Received> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();

    Some(Received {
        method,
        path,
        headers,
        body,
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Config pointing at a mock backend with fast retries and no background probing.
pub fn config_for(addr: SocketAddr) -> LinkConfig {
    let mut config = LinkConfig::default();
    config.backend.base_url = Some(format!("http://{}", addr));
    config.health_check.enabled = false;
    config.retries.base_delay_ms = 20;
    config.retries.max_delay_ms = 100;
    config.retries.network_changed_floor_ms = 20;
    config.timeouts.request_secs = 5;
    config
}

pub fn service_with(config: LinkConfig, transport: Arc<dyn Transport>) -> ConnectivityService {
    ConnectivityService::new(
        config,
        transport,
        NetworkStatus::new(),
        Arc::new(MemorySessionStore::new()),
    )
    .unwrap()
}

pub type Reply = Result<BackendResponse, TransportError>;

pub fn ok(status: u16, body: &str) -> Reply {
    Ok(BackendResponse::new(status, body))
}

pub fn fail(kind: FailureKind) -> Reply {
    Err(TransportError::new(kind, format!("injected {}", kind.as_str())))
}

/// Transport whose replies are scripted per path, then per scheme, then a
/// fallback.
pub struct ScriptedTransport {
    by_path: Mutex<HashMap<String, VecDeque<Reply>>>,
    by_scheme: Mutex<HashMap<String, Reply>>,
    fallback: Reply,
    delay: Option<Duration>,
    log: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new(fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            by_path: Mutex::new(HashMap::new()),
            by_scheme: Mutex::new(HashMap::new()),
            fallback,
            delay: None,
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn with_delay(fallback: Reply, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            by_path: Mutex::new(HashMap::new()),
            by_scheme: Mutex::new(HashMap::new()),
            fallback,
            delay: Some(delay),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn on_path(&self, path: &str, reply: Reply) {
        self.by_path
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn on_scheme(&self, scheme: &str, reply: Reply) {
        self.by_scheme
            .lock()
            .unwrap()
            .insert(scheme.to_string(), reply);
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.log.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.log
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
        let scheme = request.url.scheme().to_string();
        self.log.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reply) = self
            .by_path
            .lock()
            .unwrap()
            .get_mut(&path)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        if let Some(reply) = self.by_scheme.lock().unwrap().get(&scheme) {
            return reply.clone();
        }
        self.fallback.clone()
    }
}
