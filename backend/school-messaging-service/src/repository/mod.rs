//! Persistence ports.
//!
//! The service only talks to these traits. Two adapters implement all of
//! them: [`PgStore`] for production and [`MemoryStore`] for tests and local
//! runs without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Account, Conversation, Member, Message, MessageCursor, Receipt};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Account>>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Inserts the conversation and its members atomically.
    ///
    /// `direct_key` is unique across conversations; a duplicate fails with
    /// `AppError::Conflict` and writes nothing.
    async fn create_with_members(
        &self,
        conversation: &Conversation,
        direct_key: Option<&str>,
        members: &[Member],
    ) -> AppResult<()>;

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Conversation>>;

    /// Conversations the account belongs to, most recently updated first.
    async fn list_by_account(&self, account_id: Uuid) -> AppResult<Vec<Conversation>>;

    async fn get_members(&self, conversation_id: Uuid) -> AppResult<Vec<Member>>;

    async fn is_member(&self, conversation_id: Uuid, account_id: Uuid) -> AppResult<bool>;

    /// Direct conversation between two accounts of a school, in either order.
    async fn find_direct_between(
        &self,
        school_id: Uuid,
        a: Uuid,
        b: Uuid,
    ) -> AppResult<Option<Conversation>>;

    /// Moves `updated_at` forward to `at`; never moves it back.
    async fn update_timestamp(&self, conversation_id: Uuid, at: DateTime<Utc>) -> AppResult<()>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create(&self, message: &Message) -> AppResult<()>;

    /// Newest-first page of messages strictly before `before`.
    async fn list_by_conversation(
        &self,
        conversation_id: Uuid,
        limit: i64,
        before: Option<MessageCursor>,
    ) -> AppResult<Vec<Message>>;

    async fn get_last_by_conversation(&self, conversation_id: Uuid) -> AppResult<Option<Message>>;

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Message>>;
}

#[async_trait]
pub trait ReceiptRepository: Send + Sync {
    /// Inserts receipts, skipping any (message, account) pair that exists.
    async fn create_batch(&self, receipts: &[Receipt]) -> AppResult<()>;

    async fn count_unread(&self, account_id: Uuid, conversation_id: Uuid) -> AppResult<i64>;

    /// Stamps `read_at` on the account's unread receipts in the conversation
    /// whose message was created at or before `up_to`. Returns rows changed.
    async fn mark_read_up_to(
        &self,
        account_id: Uuid,
        conversation_id: Uuid,
        up_to: DateTime<Utc>,
        read_at: DateTime<Utc>,
    ) -> AppResult<u64>;
}

/// Handles to every port, shared by the service.
#[derive(Clone)]
pub struct Repositories {
    pub accounts: Arc<dyn AccountRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub receipts: Arc<dyn ReceiptRepository>,
}

impl Repositories {
    /// Uses one adapter for every port.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: AccountRepository
            + ConversationRepository
            + MessageRepository
            + ReceiptRepository
            + 'static,
    {
        Self {
            accounts: store.clone(),
            conversations: store.clone(),
            messages: store.clone(),
            receipts: store,
        }
    }
}
