use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{AccountRepository, ConversationRepository, MessageRepository, ReceiptRepository};
use crate::error::{AppError, AppResult};
use crate::models::{
    direct_key, Account, AccountRole, Conversation, ConversationKind, Member, Message,
    MessageCursor, MessageKind, Receipt,
};

const CONVERSATION_COLUMNS: &str = "id, conversation_type, school_id, created_at, updated_at";
const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, sender_role, kind, text, media_uri, metadata, created_at";

/// PostgreSQL adapter for every persistence port.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn invalid_column(column: &str, value: &str) -> AppError {
    AppError::Database(format!("unexpected {column} value in row: {value}"))
}

fn account_from_row(row: &PgRow) -> AppResult<Account> {
    let role: String = row.try_get("role")?;
    Ok(Account {
        id: row.try_get("id")?,
        school_id: row.try_get("school_id")?,
        role: AccountRole::from_db(&role).ok_or_else(|| invalid_column("role", &role))?,
    })
}

fn conversation_from_row(row: &PgRow) -> AppResult<Conversation> {
    let kind: String = row.try_get("conversation_type")?;
    Ok(Conversation {
        id: row.try_get("id")?,
        kind: ConversationKind::from_db(&kind)
            .ok_or_else(|| invalid_column("conversation_type", &kind))?,
        school_id: row.try_get("school_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn member_from_row(row: &PgRow) -> AppResult<Member> {
    let role: String = row.try_get("role")?;
    Ok(Member {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        account_id: row.try_get("account_id")?,
        role: AccountRole::from_db(&role).ok_or_else(|| invalid_column("role", &role))?,
        created_at: row.try_get("created_at")?,
    })
}

fn message_from_row(row: &PgRow) -> AppResult<Message> {
    let sender_role: String = row.try_get("sender_role")?;
    let kind: String = row.try_get("kind")?;
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_id: row.try_get("sender_id")?,
        sender_role: AccountRole::from_db(&sender_role)
            .ok_or_else(|| invalid_column("sender_role", &sender_role))?,
        kind: MessageKind::from_db(&kind).ok_or_else(|| invalid_column("kind", &kind))?,
        text: row.try_get("text")?,
        media_uri: row.try_get("media_uri")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl AccountRepository for PgStore {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Account>> {
        let row = sqlx::query("SELECT id, school_id, role FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }
}

#[async_trait]
impl ConversationRepository for PgStore {
    async fn create_with_members(
        &self,
        conversation: &Conversation,
        direct_key: Option<&str>,
        members: &[Member],
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, conversation_type, school_id, direct_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(conversation.id)
        .bind(conversation.kind.to_db())
        .bind(conversation.school_id)
        .bind(direct_key)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&mut *tx)
        .await?;

        for member in members {
            sqlx::query(
                r#"
                INSERT INTO conversation_members (id, conversation_id, account_id, role, created_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(member.id)
            .bind(member.conversation_id)
            .bind(member.account_id)
            .bind(member.role.to_db())
            .bind(member.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn list_by_account(&self, account_id: Uuid) -> AppResult<Vec<Conversation>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.conversation_type, c.school_id, c.created_at, c.updated_at
            FROM conversations c
            JOIN conversation_members m ON m.conversation_id = c.id
            WHERE m.account_id = $1
            ORDER BY c.updated_at DESC, c.id DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(conversation_from_row).collect()
    }

    async fn get_members(&self, conversation_id: Uuid) -> AppResult<Vec<Member>> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, account_id, role, created_at
            FROM conversation_members
            WHERE conversation_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(member_from_row).collect()
    }

    async fn is_member(&self, conversation_id: Uuid, account_id: Uuid) -> AppResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM conversation_members
                WHERE conversation_id = $1 AND account_id = $2
            )
            "#,
        )
        .bind(conversation_id)
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<bool, _>(0)?)
    }

    async fn find_direct_between(
        &self,
        school_id: Uuid,
        a: Uuid,
        b: Uuid,
    ) -> AppResult<Option<Conversation>> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE direct_key = $1");
        let row = sqlx::query(&sql)
            .bind(direct_key(school_id, a, b))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn update_timestamp(&self, conversation_id: Uuid, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            "UPDATE conversations SET updated_at = GREATEST(updated_at, $2) WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for PgStore {
    async fn create(&self, message: &Message) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO messages
                (id, conversation_id, sender_id, sender_role, kind, text, media_uri, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(message.sender_role.to_db())
        .bind(message.kind.to_db())
        .bind(message.text.as_deref())
        .bind(message.media_uri.as_deref())
        .bind(message.metadata.as_deref())
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_conversation(
        &self,
        conversation_id: Uuid,
        limit: i64,
        before: Option<MessageCursor>,
    ) -> AppResult<Vec<Message>> {
        let rows = match before {
            Some(cursor) => {
                let sql = format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE conversation_id = $1 AND (created_at, id) < ($2, $3) \
                     ORDER BY created_at DESC, id DESC LIMIT $4"
                );
                sqlx::query(&sql)
                    .bind(conversation_id)
                    .bind(cursor.created_at)
                    .bind(cursor.id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE conversation_id = $1 \
                     ORDER BY created_at DESC, id DESC LIMIT $2"
                );
                sqlx::query(&sql)
                    .bind(conversation_id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(message_from_row).collect()
    }

    async fn get_last_by_conversation(&self, conversation_id: Uuid) -> AppResult<Option<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Message>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }
}

#[async_trait]
impl ReceiptRepository for PgStore {
    async fn create_batch(&self, receipts: &[Receipt]) -> AppResult<()> {
        if receipts.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = receipts.iter().map(|r| r.id).collect();
        let message_ids: Vec<Uuid> = receipts.iter().map(|r| r.message_id).collect();
        let account_ids: Vec<Uuid> = receipts.iter().map(|r| r.account_id).collect();

        sqlx::query(
            r#"
            INSERT INTO message_receipts (id, message_id, account_id)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::uuid[])
            ON CONFLICT (message_id, account_id) DO NOTHING
            "#,
        )
        .bind(ids)
        .bind(message_ids)
        .bind(account_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_unread(&self, account_id: Uuid, conversation_id: Uuid) -> AppResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*)
            FROM message_receipts r
            JOIN messages m ON m.id = r.message_id
            WHERE r.account_id = $1 AND m.conversation_id = $2 AND r.read_at IS NULL
            "#,
        )
        .bind(account_id)
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn mark_read_up_to(
        &self,
        account_id: Uuid,
        conversation_id: Uuid,
        up_to: DateTime<Utc>,
        read_at: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE message_receipts r
            SET read_at = $4
            FROM messages m
            WHERE m.id = r.message_id
              AND r.account_id = $1
              AND m.conversation_id = $2
              AND r.read_at IS NULL
              AND m.created_at <= $3
            "#,
        )
        .bind(account_id)
        .bind(conversation_id)
        .bind(up_to)
        .bind(read_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
