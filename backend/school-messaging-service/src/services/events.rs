//! Domain events produced by conversation mutations.
//!
//! The service returns an event alongside every mutation result; whoever
//! called it decides how to deliver the event. Event names follow the
//! "object.action" convention and double as the live envelope `type`.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::Message;

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    /// A message was persisted.
    MessageCreated(Message),

    /// `reader_id` has read everything up to and including `message_id`.
    ConversationRead {
        conversation_id: Uuid,
        message_id: Uuid,
        reader_id: Uuid,
    },
}

#[derive(Serialize)]
struct ReadPayload {
    message_id: Uuid,
    reader_id: Uuid,
}

impl ConversationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageCreated(_) => "message.created",
            Self::ConversationRead { .. } => "conversation.read",
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        match self {
            Self::MessageCreated(message) => message.conversation_id,
            Self::ConversationRead {
                conversation_id, ..
            } => *conversation_id,
        }
    }

    /// `data` part of the envelope.
    pub fn payload(&self) -> Result<JsonValue, serde_json::Error> {
        match self {
            Self::MessageCreated(message) => serde_json::to_value(message),
            Self::ConversationRead {
                message_id,
                reader_id,
                ..
            } => serde_json::to_value(ReadPayload {
                message_id: *message_id,
                reader_id: *reader_id,
            }),
        }
    }
}

/// Result of a mutation plus the event describing it.
#[derive(Debug, Clone)]
pub struct Emitted<T> {
    pub value: T,
    pub event: ConversationEvent,
}

/// Live delivery of domain events.
///
/// Publishing is fire-and-forget: failures are logged by the implementation
/// and never reach the caller, since the mutation is already committed.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: ConversationEvent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn read_event_payload_shape() {
        let message_id = Uuid::new_v4();
        let reader_id = Uuid::new_v4();
        let event = ConversationEvent::ConversationRead {
            conversation_id: Uuid::new_v4(),
            message_id,
            reader_id,
        };
        let payload = event.payload().unwrap();
        assert_eq!(payload["message_id"], message_id.to_string());
        assert_eq!(payload["reader_id"], reader_id.to_string());
        assert!(payload.get("conversation_id").is_none());
    }

    #[test]
    fn event_types_are_unique() {
        let message = crate::models::MessageDraft::text("hi")
            .into_message(
                Uuid::new_v4(),
                Uuid::new_v4(),
                crate::models::AccountRole::Teacher,
            )
            .unwrap();
        let events = [
            ConversationEvent::MessageCreated(message),
            ConversationEvent::ConversationRead {
                conversation_id: Uuid::new_v4(),
                message_id: Uuid::new_v4(),
                reader_id: Uuid::new_v4(),
            },
        ];
        let names: HashSet<_> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(names.len(), events.len());
    }
}
