//! Live protocol frames.
//!
//! Every frame in either direction is a JSON envelope:
//! ```json
//! { "type": "message.create", "data": { ... } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{ConversationSnapshot, Message, MessageDraft};

pub const CONVERSATION_READ: &str = "conversation.read";
pub const MESSAGE_CREATE: &str = "message.create";

#[derive(Serialize)]
struct Envelope<'a, T: Serialize + ?Sized> {
    #[serde(rename = "type")]
    event_type: &'a str,
    data: &'a T,
}

/// Serializes `{type, data}` once; the result is shared by every recipient.
pub fn encode<T: Serialize + ?Sized>(
    event_type: &str,
    data: &T,
) -> Result<Arc<str>, serde_json::Error> {
    serde_json::to_string(&Envelope { event_type, data }).map(Arc::from)
}

/// Outer shape of an inbound frame, before the type is interpreted.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: JsonValue,
}

impl RawEnvelope {
    /// `None` when the frame is not a protocol envelope at all.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadRequest {
    #[serde(default)]
    pub message_id: Option<Uuid>,
}

/// Inbound requests this server understands.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    ConversationRead(ReadRequest),
    MessageCreate(MessageDraft),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InboundError {
    #[error("unsupported event")]
    Unsupported(String),

    #[error("invalid {0} data")]
    InvalidData(&'static str),
}

impl InboundEvent {
    pub fn decode(raw: RawEnvelope) -> Result<Self, InboundError> {
        match raw.event_type.as_str() {
            CONVERSATION_READ => serde_json::from_value(raw.data)
                .map(Self::ConversationRead)
                .map_err(|_| InboundError::InvalidData(CONVERSATION_READ)),
            MESSAGE_CREATE => serde_json::from_value(raw.data)
                .map(Self::MessageCreate)
                .map_err(|_| InboundError::InvalidData(MESSAGE_CREATE)),
            _ => Err(InboundError::Unsupported(raw.event_type)),
        }
    }
}

/// Frames addressed to a single session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "conversation.snapshot")]
    Snapshot(ConversationSnapshot),

    #[serde(rename = "message.create.ack")]
    MessageCreateAck(Message),

    #[serde(rename = "conversation.read.ack")]
    ConversationReadAck { message_id: Uuid },

    #[serde(rename = "error")]
    Error { message: String },
}

impl OutboundEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Snapshot(_) => "conversation.snapshot",
            Self::MessageCreateAck(_) => "message.create.ack",
            Self::ConversationReadAck { .. } => "conversation.read.ack",
            Self::Error { .. } => "error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_text(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}
