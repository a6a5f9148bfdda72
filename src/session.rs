//! Session registry and the wrapped per-session output channel.
//!
//! One session per `/sse` connection: created when the stream is opened,
//! removed when it closes. The registry is the only shared mutable
//! structure in the server; entries are independent, so no cross-session
//! locking is needed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::fault::Fault;

/// Queue depth per session before message posts start backing up.
const SESSION_CHANNEL_CAPACITY: usize = 64;

/// Per-connection flag recording whether response bytes have gone out.
///
/// This is the sole signal downstream code uses to decide between a fresh
/// structured error response and a stream-embedded error event. One per
/// connection, never shared across connections.
#[derive(Debug, Default)]
pub struct ResponseState {
    started: AtomicBool,
}

impl ResponseState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

struct SessionEntry {
    tx: mpsc::Sender<Value>,
    response: Arc<ResponseState>,
}

/// Live sessions keyed by session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionEntry>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session for a freshly opened event stream. Returns the
    /// session id, the receiving half the stream drains, and the stream's
    /// response-started flag.
    pub fn open(&self) -> (Uuid, mpsc::Receiver<Value>, Arc<ResponseState>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let response = ResponseState::new();
        self.sessions.insert(
            session_id,
            SessionEntry {
                tx,
                response: Arc::clone(&response),
            },
        );
        debug!("session {} opened", session_id);
        (session_id, rx, response)
    }

    /// Resolve a session id to its output channel. A missing or malformed id
    /// is a classified fault, never a crash.
    pub fn resolve(&self, session_id: &str) -> Result<SessionSender, Fault> {
        let id = Uuid::parse_str(session_id)
            .map_err(|_| Fault::session_not_found(session_id))?;
        let entry = self
            .sessions
            .get(&id)
            .ok_or_else(|| Fault::session_not_found(session_id))?;
        Ok(SessionSender {
            session_id: id,
            tx: entry.tx.clone(),
            response: Arc::clone(&entry.response),
        })
    }

    /// Remove a session. Idempotent: closing an already-closed session is a
    /// no-op.
    pub fn close(&self, session_id: Uuid) {
        if self.sessions.remove(&session_id).is_some() {
            debug!("session {} closed", session_id);
        }
    }

    pub fn contains(&self, session_id: Uuid) -> bool {
        self.sessions.contains_key(&session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Wrapped send primitive for one session's server-to-client channel.
///
/// A closed receiving end surfaces as a `ClosedResource` fault so the
/// dispatcher can classify it; it is never allowed to escape as a panic or
/// an unhandled error.
#[derive(Clone, Debug)]
pub struct SessionSender {
    session_id: Uuid,
    tx: mpsc::Sender<Value>,
    response: Arc<ResponseState>,
}

impl SessionSender {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The response-started flag of the stream this sender feeds.
    pub fn response(&self) -> &ResponseState {
        &self.response
    }

    /// Deliver one frame to the session's event stream.
    pub async fn send(&self, frame: Value) -> Result<(), Fault> {
        self.tx.send(frame).await.map_err(|_| {
            Fault::closed_resource(format!("session {} channel closed", self.session_id))
        })
    }

    /// Best-effort send for frames that must never fail the caller, such as
    /// in-band error events on a stream that may already be gone.
    pub async fn send_lossy(&self, frame: Value) {
        if self.send(frame).await.is_err() {
            debug!(
                "suppressed delivery failure to session {}",
                self.session_id
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn open_resolve_deliver_roundtrip() {
        let registry = SessionRegistry::new();
        let (session_id, mut rx, _response) = registry.open();

        let sender = registry.resolve(&session_id.to_string()).unwrap();
        sender.send(json!({"hello": "world"})).await.unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame["hello"], "world");
    }

    #[tokio::test]
    async fn resolve_unknown_session_is_classified() {
        let registry = SessionRegistry::new();
        let fault = registry
            .resolve("0f8fad5b-d9cb-469f-a165-70867728950e")
            .unwrap_err();
        assert!(fault.message.contains("Could not find session"));
    }

    #[tokio::test]
    async fn resolve_malformed_session_id_is_classified() {
        let registry = SessionRegistry::new();
        let fault = registry.resolve("does-not-exist").unwrap_err();
        assert!(fault.message.contains("Could not find session"));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let registry = SessionRegistry::new();
        let (session_id, _rx, _response) = registry.open();
        assert!(registry.contains(session_id));

        registry.close(session_id);
        assert!(!registry.contains(session_id));
        // Second close must be a no-op, not a fault.
        registry.close(session_id);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn send_to_dropped_receiver_is_closed_resource() {
        let registry = SessionRegistry::new();
        let (session_id, rx, _response) = registry.open();
        drop(rx);

        let sender = registry.resolve(&session_id.to_string()).unwrap();
        let fault = sender.send(json!({})).await.unwrap_err();
        assert!(fault.is_disconnect());
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let registry = SessionRegistry::new();
        let (first, mut rx_first, _r1) = registry.open();
        let (second, mut rx_second, _r2) = registry.open();
        assert_eq!(registry.len(), 2);

        registry.close(first);
        assert!(registry.resolve(&first.to_string()).is_err());

        // The sibling session is unaffected.
        let sender = registry.resolve(&second.to_string()).unwrap();
        sender.send(json!({"still": "alive"})).await.unwrap();
        assert!(rx_second.recv().await.is_some());
        assert!(rx_first.try_recv().is_err());
    }

    #[tokio::test]
    async fn response_state_starts_unset() {
        let registry = SessionRegistry::new();
        let (session_id, _rx, response) = registry.open();
        assert!(!response.started());

        response.mark_started();
        let sender = registry.resolve(&session_id.to_string()).unwrap();
        assert!(sender.response().started());
    }
}
