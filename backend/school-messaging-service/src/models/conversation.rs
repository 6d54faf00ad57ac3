use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{now_micros, Member, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    /// Reserved; no operation creates group conversations yet.
    Group,
}

impl ConversationKind {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub school_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new_direct(school_id: Uuid) -> Self {
        let now = now_micros();
        Self {
            id: Uuid::new_v4(),
            kind: ConversationKind::Direct,
            school_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Dedup key of a direct conversation: school plus the sorted account pair.
pub fn direct_key(school_id: Uuid, a: Uuid, b: Uuid) -> String {
    let (low, high) = sorted_pair(a, b);
    format!("{school_id}:{low}:{high}")
}

pub fn sorted_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Conversation as presented to one member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub members: Vec<Member>,
    pub last_message: Option<Message>,
    /// Unread receipts of the viewing account.
    pub unread_count: i64,
}

/// Initial frame of a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub conversation: ConversationSummary,
    pub messages: Vec<Message>,
}
