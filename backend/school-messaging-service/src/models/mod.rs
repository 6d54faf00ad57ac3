mod account;
mod conversation;
mod member;
mod message;
mod receipt;

pub use account::{Account, AccountRole};
pub use conversation::{
    direct_key, sorted_pair, Conversation, ConversationKind, ConversationSnapshot,
    ConversationSummary,
};
pub use member::Member;
pub use message::{Message, MessageCursor, MessageDraft, MessageKind};
pub use receipt::Receipt;

use chrono::{DateTime, SubsecRound, Utc};

/// Current time at PostgreSQL `timestamptz` precision.
///
/// Both storage adapters must agree on `(created_at, id)` ordering, so
/// timestamps are truncated before they are compared or stored.
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
