use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Read state of one message for one recipient.
///
/// `read_at` goes from `None` to `Some` at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: Uuid,
    pub message_id: Uuid,
    pub account_id: Uuid,
    pub read_at: Option<DateTime<Utc>>,
}

impl Receipt {
    pub fn unread(message_id: Uuid, account_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_id,
            account_id,
            read_at: None,
        }
    }
}
