use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use switchboard_core::domain::conversation::ConversationId;
use switchboard_core::domain::line::LineId;
use switchboard_core::domain::message::{Channel, DeliveryStatus, Message, MessageId, Sender};

use super::{decode_field, InsertOutcome, MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "SELECT id, conversation_id, sender, body, media_url, channel, \
     delivery_status, read_at, phone_line_id, provider_message_id, created_at FROM message";

fn message_from_row(row: &SqliteRow) -> Result<Message, RepositoryError> {
    let sender: String = row.try_get("sender")?;
    let channel: String = row.try_get("channel")?;
    let delivery_status: String = row.try_get("delivery_status")?;
    Ok(Message {
        id: MessageId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        sender: decode_field(&sender, Sender::parse, "sender")?,
        body: row.try_get("body")?,
        media_url: row.try_get("media_url")?,
        channel: decode_field(&channel, Channel::parse, "channel")?,
        delivery_status: decode_field(&delivery_status, DeliveryStatus::parse, "delivery status")?,
        read_at: row.try_get("read_at")?,
        phone_line_id: row.try_get::<Option<String>, _>("phone_line_id")?.map(LineId),
        provider_message_id: row.try_get("provider_message_id")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn insert(&self, message: &Message) -> Result<InsertOutcome, RepositoryError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO message \
             (id, conversation_id, sender, body, media_url, channel, delivery_status, \
              read_at, phone_line_id, provider_message_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&message.id.0)
        .bind(&message.conversation_id.0)
        .bind(message.sender.as_str())
        .bind(&message.body)
        .bind(&message.media_url)
        .bind(message.channel.as_str())
        .bind(message.delivery_status.as_str())
        .bind(message.read_at)
        .bind(message.phone_line_id.as_ref().map(|id| id.0.as_str()))
        .bind(&message.provider_message_id)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(InsertOutcome::Inserted(message.clone()));
        }

        // The partial unique index on provider_message_id swallowed the
        // insert; hand back the row created by the earlier delivery.
        let provider_id = message.provider_message_id.as_deref().ok_or_else(|| {
            RepositoryError::Decode("duplicate message insert without provider id".to_string())
        })?;
        let existing = self.find_by_provider_id(provider_id).await?.ok_or_else(|| {
            RepositoryError::Decode(format!(
                "duplicate insert for provider id `{provider_id}` but no stored row"
            ))
        })?;
        Ok(InsertOutcome::Duplicate(existing))
    }

    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn find_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Message>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE provider_message_id = ?1"))
            .bind(provider_message_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE conversation_id = ?1 ORDER BY created_at, id"
        ))
        .bind(&conversation_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn mark_read(
        &self,
        conversation_id: &ConversationId,
        message_ids: &[MessageId],
        reader: Sender,
        at: DateTime<Utc>,
    ) -> Result<Vec<MessageId>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let mut updated = Vec::new();

        for id in message_ids {
            let result = sqlx::query(
                "UPDATE message SET delivery_status = 'read', read_at = ?3 \
                 WHERE id = ?1 AND conversation_id = ?2 AND sender <> ?4 \
                 AND delivery_status IN ('sent', 'delivered')",
            )
            .bind(&id.0)
            .bind(&conversation_id.0)
            .bind(at)
            .bind(reader.as_str())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                updated.push(id.clone());
            }
        }

        tx.commit().await?;
        Ok(updated)
    }

    async fn attach_provider_id(
        &self,
        id: &MessageId,
        provider_message_id: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE message SET provider_message_id = ?2 WHERE id = ?1")
            .bind(&id.0)
            .bind(provider_message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_delivery_status(
        &self,
        provider_message_id: &str,
        next: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let Some(current) = self.find_by_provider_id(provider_message_id).await? else {
            return Ok(false);
        };
        if !current.delivery_status.can_advance(next) {
            return Ok(false);
        }

        // Guarded by the status read above: a racing callback that advanced
        // the row first makes this update match zero rows.
        let read_at = (next == DeliveryStatus::Read).then_some(at);
        let result = sqlx::query(
            "UPDATE message SET delivery_status = ?2, read_at = ?3 \
             WHERE provider_message_id = ?1 AND delivery_status = ?4",
        )
        .bind(provider_message_id)
        .bind(next.as_str())
        .bind(read_at)
        .bind(current.delivery_status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
