//! Active session registry.
//!
//! Maps the session id handed out at connect time to the channel feeding that
//! connection's WebSocket writer. Events sent through one sender arrive in order.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::protocol::ServerEvent;

pub type SessionId = String;
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Generate a fresh opaque session id.
pub fn new_session_id() -> SessionId {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, EventSender>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session_id: SessionId, sender: EventSender) {
        self.sessions.write().await.insert(session_id, sender);
    }

    pub async fn unregister(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    /// Send an event to one session. Returns false if the session is gone.
    pub async fn send_to(&self, session_id: &str, event: ServerEvent) -> bool {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(sender) => sender.send(event).is_ok(),
            None => {
                debug!(sid = %session_id, "dropping event for unknown session");
                false
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
