use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{now_micros, AccountRole};

/// Participant of a conversation.
///
/// `role` is the account's platform role when the conversation was created
/// and is never updated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub account_id: Uuid,
    pub role: AccountRole,
    pub created_at: DateTime<Utc>,
}

impl Member {
    pub fn new(conversation_id: Uuid, account_id: Uuid, role: AccountRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            account_id,
            role,
            created_at: now_micros(),
        }
    }
}
