use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use switchboard_core::domain::conversation::{AgentId, ControlState, ConversationId};
use switchboard_core::domain::handoff::{HandoffEvent, HandoffEventId, HandoffReason};

use super::{decode_field, HandoffEventRepository, RepositoryError};
use crate::DbPool;

pub struct SqlHandoffEventRepository {
    pool: DbPool,
}

impl SqlHandoffEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn event_from_row(row: &SqliteRow) -> Result<HandoffEvent, RepositoryError> {
    let from_state: String = row.try_get("from_state")?;
    let to_state: String = row.try_get("to_state")?;
    let reason: String = row.try_get("reason")?;
    Ok(HandoffEvent {
        id: HandoffEventId(row.try_get("id")?),
        conversation_id: ConversationId(row.try_get("conversation_id")?),
        from_state: decode_field(&from_state, ControlState::parse, "control state")?,
        to_state: decode_field(&to_state, ControlState::parse, "control state")?,
        reason: decode_field(&reason, HandoffReason::parse, "handoff reason")?,
        actor_id: row.try_get::<Option<String>, _>("actor_id")?.map(AgentId),
        context_summary: row.try_get("context_summary")?,
        occurred_at: row.try_get("occurred_at")?,
    })
}

#[async_trait]
impl HandoffEventRepository for SqlHandoffEventRepository {
    async fn append(&self, event: &HandoffEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO handoff_event \
             (id, conversation_id, from_state, to_state, reason, actor_id, \
              context_summary, occurred_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&event.id.0)
        .bind(&event.conversation_id.0)
        .bind(event.from_state.as_str())
        .bind(event.to_state.as_str())
        .bind(event.reason.as_str())
        .bind(event.actor_id.as_ref().map(|agent| agent.0.as_str()))
        .bind(&event.context_summary)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<HandoffEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, from_state, to_state, reason, actor_id, \
             context_summary, occurred_at FROM handoff_event \
             WHERE conversation_id = ?1 ORDER BY occurred_at, id",
        )
        .bind(&conversation_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use switchboard_core::domain::conversation::{AgentId, ControlState};
    use switchboard_core::domain::handoff::{HandoffEvent, HandoffReason};

    use super::SqlHandoffEventRepository;
    use crate::migrations::run_pending;
    use crate::repositories::{ConversationRepository, HandoffEventRepository, SqlConversationRepository};
    use crate::{connect_with_settings, DbPool};

    async fn pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn audit_log_preserves_order_and_context() {
        let pool = pool().await;
        let conversation = SqlConversationRepository::new(pool.clone())
            .find_or_create("default", "+15550001111", None, Utc::now())
            .await
            .expect("conversation");
        let repo = SqlHandoffEventRepository::new(pool);

        let taken = HandoffEvent::new(
            conversation.id.clone(),
            ControlState::Ai,
            ControlState::Human,
            HandoffReason::CustomerRequest,
            Some(AgentId("42".to_string())),
            Utc::now(),
        );
        let returned = HandoffEvent::new(
            conversation.id.clone(),
            ControlState::Human,
            ControlState::Ai,
            HandoffReason::Manual,
            Some(AgentId("42".to_string())),
            Utc::now() + chrono::Duration::minutes(5),
        )
        .with_context_summary(Some("customer wants a callback tomorrow".to_string()));

        repo.append(&taken).await.expect("append taken");
        repo.append(&returned).await.expect("append returned");

        let log = repo.list_for_conversation(&conversation.id).await.expect("list");
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].reason, HandoffReason::CustomerRequest);
        assert_eq!(
            log[1].context_summary.as_deref(),
            Some("customer wants a callback tomorrow")
        );
    }
}
