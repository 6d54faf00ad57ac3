use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    now_micros, sorted_pair, Conversation, ConversationSnapshot, ConversationSummary, Member,
    Message, MessageDraft, Receipt,
};
use crate::repository::Repositories;
use crate::services::events::{ConversationEvent, Emitted};

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Missing or non-positive limits fall back to the default page size.
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    match limit {
        Some(n) if n > 0 => n.min(MAX_PAGE_SIZE),
        _ => DEFAULT_PAGE_SIZE,
    }
}

/// Conversation, message and read-receipt rules.
///
/// Knows nothing about transports. Mutations return an [`Emitted`] value
/// whose event the caller hands to an `EventPublisher`.
#[derive(Clone)]
pub struct ConversationService {
    repos: Repositories,
}

impl ConversationService {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// Returns the direct conversation between `initiator` and `participant`,
    /// creating it on first use. The result is the same for either argument
    /// order.
    pub async fn create_direct_conversation(
        &self,
        initiator: Uuid,
        participant: Uuid,
    ) -> AppResult<ConversationSummary> {
        if initiator == participant {
            return Err(AppError::Invalid(
                "cannot start a conversation with yourself".into(),
            ));
        }

        let initiator_account = self
            .repos
            .accounts
            .find_by_id(initiator)
            .await?
            .ok_or(AppError::NotFound)?;
        let participant_account = self
            .repos
            .accounts
            .find_by_id(participant)
            .await?
            .ok_or(AppError::NotFound)?;

        if initiator_account.school_id != participant_account.school_id {
            return Err(AppError::Invalid(
                "participants belong to different schools".into(),
            ));
        }
        let school_id = initiator_account.school_id;
        let (low, high) = sorted_pair(initiator, participant);

        if let Some(existing) = self
            .repos
            .conversations
            .find_direct_between(school_id, low, high)
            .await?
        {
            debug!(conversation_id = %existing.id, "direct conversation already exists");
            return self.summarize(existing, initiator).await;
        }

        let conversation = Conversation::new_direct(school_id);
        let members = vec![
            Member::new(conversation.id, initiator, initiator_account.role),
            Member::new(conversation.id, participant, participant_account.role),
        ];
        let key = crate::models::direct_key(school_id, low, high);

        match self
            .repos
            .conversations
            .create_with_members(&conversation, Some(&key), &members)
            .await
        {
            Ok(()) => {
                info!(
                    conversation_id = %conversation.id,
                    school_id = %school_id,
                    "created direct conversation"
                );
                Ok(ConversationSummary {
                    conversation,
                    members,
                    last_message: None,
                    unread_count: 0,
                })
            }
            Err(AppError::Conflict(_)) => {
                // Lost the race to a concurrent create of the same pair.
                let existing = self
                    .repos
                    .conversations
                    .find_direct_between(school_id, low, high)
                    .await?
                    .ok_or_else(|| AppError::Conflict("direct conversation".into()))?;
                self.summarize(existing, initiator).await
            }
            Err(e) => Err(e),
        }
    }

    /// Persists a message and one unread receipt per other member.
    ///
    /// Live delivery is up to the caller via the returned event.
    pub async fn send_message(
        &self,
        sender: Uuid,
        conversation_id: Uuid,
        draft: MessageDraft,
    ) -> AppResult<Emitted<Message>> {
        self.ensure_member(conversation_id, sender).await?;

        let account = self
            .repos
            .accounts
            .find_by_id(sender)
            .await?
            .ok_or(AppError::NotFound)?;
        let message = draft.into_message(conversation_id, sender, account.role)?;

        self.repos.messages.create(&message).await?;
        self.repos
            .conversations
            .update_timestamp(conversation_id, message.created_at)
            .await?;

        let receipts: Vec<Receipt> = self
            .repos
            .conversations
            .get_members(conversation_id)
            .await?
            .into_iter()
            .filter(|m| m.account_id != sender)
            .map(|m| Receipt::unread(message.id, m.account_id))
            .collect();
        self.repos.receipts.create_batch(&receipts).await?;

        debug!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            recipients = receipts.len(),
            "message stored"
        );

        Ok(Emitted {
            event: ConversationEvent::MessageCreated(message.clone()),
            value: message,
        })
    }

    /// Page of history in ascending `(created_at, id)` order.
    ///
    /// With `before_id`, returns messages strictly older than that message;
    /// feeding the first id of each page back in walks the whole history
    /// without gaps or repeats.
    pub async fn list_messages(
        &self,
        account: Uuid,
        conversation_id: Uuid,
        limit: Option<i64>,
        before_id: Option<Uuid>,
    ) -> AppResult<Vec<Message>> {
        self.ensure_member(conversation_id, account).await?;

        let before = match before_id {
            Some(id) => Some(self.message_in(conversation_id, id).await?.cursor()),
            None => None,
        };

        let mut page = self
            .repos
            .messages
            .list_by_conversation(conversation_id, clamp_limit(limit), before)
            .await?;
        page.reverse();
        Ok(page)
    }

    /// Marks everything up to and including `message_id` as read for
    /// `account`. Repeating the call changes nothing.
    pub async fn mark_read(
        &self,
        account: Uuid,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> AppResult<Emitted<u64>> {
        self.ensure_member(conversation_id, account).await?;
        let target = self.message_in(conversation_id, message_id).await?;

        let updated = self
            .repos
            .receipts
            .mark_read_up_to(account, conversation_id, target.created_at, now_micros())
            .await?;

        debug!(
            conversation_id = %conversation_id,
            account_id = %account,
            updated,
            "receipts marked read"
        );

        Ok(Emitted {
            value: updated,
            event: ConversationEvent::ConversationRead {
                conversation_id,
                message_id,
                reader_id: account,
            },
        })
    }

    /// Conversations of `account`, most recently active first.
    pub async fn list_conversations(&self, account: Uuid) -> AppResult<Vec<ConversationSummary>> {
        let conversations = self.repos.conversations.list_by_account(account).await?;
        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            summaries.push(self.summarize(conversation, account).await?);
        }
        Ok(summaries)
    }

    pub async fn get_conversation_summary(
        &self,
        account: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<ConversationSummary> {
        let conversation = self
            .repos
            .conversations
            .get_by_id(conversation_id)
            .await?
            .ok_or(AppError::NotFound)?;
        self.ensure_member(conversation_id, account).await?;
        self.summarize(conversation, account).await
    }

    /// Summary plus the latest `history` messages, oldest first.
    pub async fn snapshot(
        &self,
        account: Uuid,
        conversation_id: Uuid,
        history: i64,
    ) -> AppResult<ConversationSnapshot> {
        let conversation = self.get_conversation_summary(account, conversation_id).await?;
        let messages = self
            .list_messages(account, conversation_id, Some(history), None)
            .await?;
        Ok(ConversationSnapshot {
            conversation,
            messages,
        })
    }

    async fn ensure_member(&self, conversation_id: Uuid, account: Uuid) -> AppResult<()> {
        if self
            .repos
            .conversations
            .is_member(conversation_id, account)
            .await?
        {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    async fn message_in(&self, conversation_id: Uuid, message_id: Uuid) -> AppResult<Message> {
        self.repos
            .messages
            .get_by_id(message_id)
            .await?
            .filter(|m| m.conversation_id == conversation_id)
            .ok_or(AppError::NotFound)
    }

    async fn summarize(
        &self,
        conversation: Conversation,
        viewer: Uuid,
    ) -> AppResult<ConversationSummary> {
        let members = self.repos.conversations.get_members(conversation.id).await?;
        let last_message = self
            .repos
            .messages
            .get_last_by_conversation(conversation.id)
            .await?;
        let unread_count = self
            .repos
            .receipts
            .count_unread(viewer, conversation.id)
            .await?;
        Ok(ConversationSummary {
            conversation,
            members,
            last_message,
            unread_count,
        })
    }
}
