use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AccountRepository, ConversationRepository, MessageRepository, ReceiptRepository};
use crate::error::{AppError, AppResult};
use crate::models::{
    direct_key, Account, Conversation, Member, Message, MessageCursor, Receipt,
};

#[derive(Default)]
struct State {
    accounts: HashMap<Uuid, Account>,
    conversations: HashMap<Uuid, Conversation>,
    direct_keys: HashMap<String, Uuid>,
    members: HashMap<Uuid, Vec<Member>>,
    messages: HashMap<Uuid, Message>,
    // conversation_id -> total order of its messages
    timeline: HashMap<Uuid, BTreeMap<MessageCursor, Uuid>>,
    receipts: HashMap<(Uuid, Uuid), Receipt>,
}

/// In-process adapter backed by maps under one lock.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts are owned elsewhere; this seeds the read-only lookup.
    pub async fn insert_account(&self, account: Account) {
        self.state
            .write()
            .await
            .accounts
            .insert(account.id, account);
    }

    /// Receipt of one recipient for one message, if any.
    pub async fn receipt(&self, message_id: Uuid, account_id: Uuid) -> Option<Receipt> {
        self.state
            .read()
            .await
            .receipts
            .get(&(message_id, account_id))
            .cloned()
    }

    pub async fn receipt_count(&self, message_id: Uuid) -> usize {
        self.state
            .read()
            .await
            .receipts
            .keys()
            .filter(|(m, _)| *m == message_id)
            .count()
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Account>> {
        Ok(self.state.read().await.accounts.get(&id).cloned())
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn create_with_members(
        &self,
        conversation: &Conversation,
        direct_key: Option<&str>,
        members: &[Member],
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.conversations.contains_key(&conversation.id) {
            return Err(AppError::Conflict("conversation id exists".into()));
        }
        if let Some(key) = direct_key {
            if state.direct_keys.contains_key(key) {
                return Err(AppError::Conflict("direct conversation exists".into()));
            }
            state.direct_keys.insert(key.to_string(), conversation.id);
        }
        state
            .conversations
            .insert(conversation.id, conversation.clone());
        state.members.insert(conversation.id, members.to_vec());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        Ok(self.state.read().await.conversations.get(&id).cloned())
    }

    async fn list_by_account(&self, account_id: Uuid) -> AppResult<Vec<Conversation>> {
        let state = self.state.read().await;
        let mut list: Vec<Conversation> = state
            .members
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m.account_id == account_id))
            .filter_map(|(id, _)| state.conversations.get(id).cloned())
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(list)
    }

    async fn get_members(&self, conversation_id: Uuid) -> AppResult<Vec<Member>> {
        Ok(self
            .state
            .read()
            .await
            .members
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn is_member(&self, conversation_id: Uuid, account_id: Uuid) -> AppResult<bool> {
        Ok(self
            .state
            .read()
            .await
            .members
            .get(&conversation_id)
            .map(|members| members.iter().any(|m| m.account_id == account_id))
            .unwrap_or(false))
    }

    async fn find_direct_between(
        &self,
        school_id: Uuid,
        a: Uuid,
        b: Uuid,
    ) -> AppResult<Option<Conversation>> {
        let state = self.state.read().await;
        Ok(state
            .direct_keys
            .get(&direct_key(school_id, a, b))
            .and_then(|id| state.conversations.get(id))
            .cloned())
    }

    async fn update_timestamp(&self, conversation_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        let mut state = self.state.write().await;
        let conversation = state
            .conversations
            .get_mut(&conversation_id)
            .ok_or(AppError::NotFound)?;
        if at > conversation.updated_at {
            conversation.updated_at = at;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn create(&self, message: &Message) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.messages.contains_key(&message.id) {
            return Err(AppError::Conflict("message id exists".into()));
        }
        state
            .timeline
            .entry(message.conversation_id)
            .or_default()
            .insert(message.cursor(), message.id);
        state.messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn list_by_conversation(
        &self,
        conversation_id: Uuid,
        limit: i64,
        before: Option<MessageCursor>,
    ) -> AppResult<Vec<Message>> {
        let state = self.state.read().await;
        let Some(timeline) = state.timeline.get(&conversation_id) else {
            return Ok(Vec::new());
        };
        let take = usize::try_from(limit.max(0)).unwrap_or(0);
        let page = match before {
            Some(cursor) => timeline
                .range(..cursor)
                .rev()
                .take(take)
                .filter_map(|(_, id)| state.messages.get(id).cloned())
                .collect(),
            None => timeline
                .iter()
                .rev()
                .take(take)
                .filter_map(|(_, id)| state.messages.get(id).cloned())
                .collect(),
        };
        Ok(page)
    }

    async fn get_last_by_conversation(&self, conversation_id: Uuid) -> AppResult<Option<Message>> {
        let state = self.state.read().await;
        Ok(state
            .timeline
            .get(&conversation_id)
            .and_then(|timeline| timeline.values().next_back())
            .and_then(|id| state.messages.get(id))
            .cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.state.read().await.messages.get(&id).cloned())
    }
}

#[async_trait]
impl ReceiptRepository for MemoryStore {
    async fn create_batch(&self, receipts: &[Receipt]) -> AppResult<()> {
        let mut state = self.state.write().await;
        for receipt in receipts {
            state
                .receipts
                .entry((receipt.message_id, receipt.account_id))
                .or_insert_with(|| receipt.clone());
        }
        Ok(())
    }

    async fn count_unread(&self, account_id: Uuid, conversation_id: Uuid) -> AppResult<i64> {
        let state = self.state.read().await;
        let count = state
            .receipts
            .values()
            .filter(|r| r.account_id == account_id && r.read_at.is_none())
            .filter(|r| {
                state
                    .messages
                    .get(&r.message_id)
                    .map(|m| m.conversation_id == conversation_id)
                    .unwrap_or(false)
            })
            .count();
        Ok(count as i64)
    }

    async fn mark_read_up_to(
        &self,
        account_id: Uuid,
        conversation_id: Uuid,
        up_to: DateTime<Utc>,
        read_at: DateTime<Utc>,
    ) -> AppResult<u64> {
        let mut state = self.state.write().await;
        let State {
            messages, receipts, ..
        } = &mut *state;

        let mut updated = 0;
        for receipt in receipts.values_mut() {
            if receipt.account_id != account_id || receipt.read_at.is_some() {
                continue;
            }
            let in_range = messages
                .get(&receipt.message_id)
                .map(|m| m.conversation_id == conversation_id && m.created_at <= up_to)
                .unwrap_or(false);
            if in_range {
                receipt.read_at = Some(read_at);
                updated += 1;
            }
        }
        Ok(updated)
    }
}
