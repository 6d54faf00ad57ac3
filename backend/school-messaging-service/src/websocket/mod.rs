use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::services::events::{ConversationEvent, EventPublisher};

pub mod dispatcher;
pub mod message_types;
pub mod session;
pub mod transport;

pub use dispatcher::Dispatcher;
pub use session::{EnqueueError, Outbound, SessionHandle, SessionId};

/// Live sessions grouped by the conversation they watch.
///
/// Register and unregister take the write lock; broadcasts share the read
/// lock and never wait on a session, so one slow reader cannot stall the
/// others.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    // conversation_id -> sessions watching it
    inner: Arc<RwLock<HashMap<Uuid, HashMap<SessionId, Arc<SessionHandle>>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session: Arc<SessionHandle>) {
        let conversation_id = session.conversation_id();
        let session_id = session.id();

        let mut guard = self.inner.write().await;
        let sessions = guard.entry(conversation_id).or_default();
        sessions.insert(session_id, session);

        tracing::debug!(
            %conversation_id,
            %session_id,
            total = sessions.len(),
            "registered session"
        );
    }

    /// Removes one session. Returns false if it was not registered.
    pub async fn unregister(&self, conversation_id: Uuid, session_id: SessionId) -> bool {
        let mut guard = self.inner.write().await;

        let Some(sessions) = guard.get_mut(&conversation_id) else {
            return false;
        };
        let removed = sessions.remove(&session_id).is_some();
        let remaining = sessions.len();

        if remaining == 0 {
            guard.remove(&conversation_id);
        }
        if removed {
            tracing::debug!(%conversation_id, %session_id, remaining, "unregistered session");
        }
        removed
    }

    /// Sends `{type, data}` to every session on the conversation.
    ///
    /// The envelope is serialized once. A session whose queue is full is
    /// torn down in the background and skipped. Returns the number of
    /// sessions that accepted the frame.
    pub async fn broadcast<T: Serialize + ?Sized>(
        &self,
        conversation_id: Uuid,
        event_type: &str,
        data: &T,
    ) -> usize {
        let text = match message_types::encode(event_type, data) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(event_type, error = %e, "failed to serialize broadcast");
                return 0;
            }
        };

        let guard = self.inner.read().await;
        let Some(sessions) = guard.get(&conversation_id) else {
            return 0;
        };

        let mut delivered = 0;
        for session in sessions.values() {
            match session.enqueue(Outbound::Text(Arc::clone(&text))) {
                Ok(()) => delivered += 1,
                Err(EnqueueError::Full) => {
                    tracing::warn!(
                        %conversation_id,
                        session_id = %session.id(),
                        event_type,
                        "send queue full, evicting session"
                    );
                }
                Err(EnqueueError::Closed | EnqueueError::Encode) => {}
            }
        }

        tracing::debug!(
            %conversation_id,
            event_type,
            recipients = sessions.len(),
            delivered,
            "broadcast event"
        );
        delivered
    }

    /// Session count for a conversation (for debugging/metrics)
    pub async fn session_count(&self, conversation_id: Uuid) -> usize {
        let guard = self.inner.read().await;
        guard.get(&conversation_id).map(|s| s.len()).unwrap_or(0)
    }

    pub async fn conversation_count(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[async_trait]
impl EventPublisher for ConnectionRegistry {
    async fn publish(&self, event: ConversationEvent) {
        match event.payload() {
            Ok(data) => {
                self.broadcast(event.conversation_id(), event.event_type(), &data)
                    .await;
            }
            Err(e) => {
                tracing::warn!(
                    event_type = event.event_type(),
                    error = %e,
                    "failed to serialize event payload"
                );
            }
        }
    }
}
