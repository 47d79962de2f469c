//! Session value and the cross-context session store.

use std::fmt;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::broadcast;
use uuid::Uuid;

/// An authenticated backend session.
#[derive(Clone)]
pub struct Session {
    pub token: String,
    pub principal: String,
    pub is_valid: bool,
    pub established_at: Instant,
}

impl Session {
    pub fn new(token: impl Into<String>, principal: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            principal: principal.into(),
            is_valid: true,
            established_at: Instant::now(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("principal", &self.principal)
            .field("is_valid", &self.is_valid)
            .field("established_at", &self.established_at)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum SessionChangeKind {
    Established(Session),
    Cleared,
}

/// A session change announced to other execution contexts.
#[derive(Debug, Clone)]
pub struct SessionChange {
    /// Manager instance that made the change.
    pub origin: Uuid,
    pub kind: SessionChangeKind,
}

/// Persistence and broadcast collaborator for sessions.
///
/// Every manager sharing a store sees every change, its own included; the
/// `origin` tag lets it skip those.
pub trait SessionStore: Send + Sync {
    fn publish(&self, change: SessionChange);

    fn subscribe(&self) -> broadcast::Receiver<SessionChange>;

    /// Last persisted session, if any.
    fn load(&self) -> Option<Session>;
}

/// In-process store.
pub struct MemorySessionStore {
    tx: broadcast::Sender<SessionChange>,
    current: Mutex<Option<Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            tx,
            current: Mutex::new(None),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MemorySessionStore {
    fn publish(&self, change: SessionChange) {
        {
            let mut current = self.current.lock().expect("session store mutex poisoned");
            *current = match &change.kind {
                SessionChangeKind::Established(session) => Some(session.clone()),
                SessionChangeKind::Cleared => None,
            };
        }
        let _ = self.tx.send(change);
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.tx.subscribe()
    }

    fn load(&self) -> Option<Session> {
        self.current
            .lock()
            .expect("session store mutex poisoned")
            .clone()
    }
}
