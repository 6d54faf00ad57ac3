use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{now_micros, AccountRole};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    File,
}

impl MessageKind {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "file" => Some(Self::File),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
        }
    }
}

/// Message row. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: AccountRole,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub media_uri: Option<String>,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Position in the conversation's total order.
    pub fn cursor(&self) -> MessageCursor {
        MessageCursor {
            created_at: self.created_at,
            id: self.id,
        }
    }
}

/// `(created_at, id)` pair; messages are ordered by it ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MessageCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

/// Message as submitted by a client, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media_uri: Option<String>,
    #[serde(default)]
    pub metadata: Option<String>,
}

impl MessageDraft {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text.to_db().to_string(),
            text: Some(body.into()),
            ..Default::default()
        }
    }

    /// Checks kind-specific content rules and builds the row to persist.
    pub fn into_message(
        self,
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_role: AccountRole,
    ) -> Result<Message, AppError> {
        let kind = MessageKind::from_db(self.kind.trim()).ok_or_else(|| {
            AppError::Validation(format!("unsupported message kind {:?}", self.kind))
        })?;

        match kind {
            MessageKind::Text => {
                if self.text.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    return Err(AppError::Validation("text message requires content".into()));
                }
            }
            _ => {
                if self.media_uri.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    return Err(AppError::Validation(
                        "media message requires media_uri".into(),
                    ));
                }
            }
        }

        Ok(Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            sender_role,
            kind,
            text: self.text.filter(|t| !t.is_empty()),
            media_uri: self.media_uri.filter(|m| !m.trim().is_empty()),
            metadata: self.metadata.filter(|m| !m.is_empty()),
            created_at: now_micros(),
        })
    }
}
