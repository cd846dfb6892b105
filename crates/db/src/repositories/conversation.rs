use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use switchboard_core::domain::conversation::{
    AgentId, ControlState, Conversation, ConversationId,
};
use switchboard_core::domain::line::LineId;

use super::{decode_field, CasOutcome, ControlChange, ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn conversation_from_row(row: &SqliteRow) -> Result<Conversation, RepositoryError> {
    let control_state: String = row.try_get("control_state")?;
    Ok(Conversation {
        id: ConversationId(row.try_get("id")?),
        tenant_id: row.try_get("tenant_id")?,
        phone_line_id: row.try_get::<Option<String>, _>("phone_line_id")?.map(LineId),
        customer_identity: row.try_get("customer_identity")?,
        control_state: decode_field(&control_state, ControlState::parse, "control state")?,
        controlling_agent_id: row
            .try_get::<Option<String>, _>("controlling_agent_id")?
            .map(AgentId),
        last_customer_activity_at: row.try_get("last_customer_activity_at")?,
        last_agent_activity_at: row.try_get("last_agent_activity_at")?,
        last_control_change_at: row.try_get("last_control_change_at")?,
        unread_count: row.try_get("unread_count")?,
        archived_at: row.try_get("archived_at")?,
        created_at: row.try_get("created_at")?,
    })
}

const SELECT_COLUMNS: &str = "SELECT id, tenant_id, phone_line_id, customer_identity, \
     control_state, controlling_agent_id, last_customer_activity_at, last_agent_activity_at, \
     last_control_change_at, unread_count, archived_at, created_at FROM conversation";

#[async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn find_or_create(
        &self,
        tenant_id: &str,
        customer_identity: &str,
        phone_line_id: Option<&LineId>,
        now: DateTime<Utc>,
    ) -> Result<Conversation, RepositoryError> {
        let line = phone_line_id.map(|id| id.0.as_str());
        let select = format!(
            "{SELECT_COLUMNS} WHERE tenant_id = ?1 AND customer_identity = ?2 \
             AND IFNULL(phone_line_id, '') = IFNULL(?3, '')"
        );

        if let Some(row) = sqlx::query(&select)
            .bind(tenant_id)
            .bind(customer_identity)
            .bind(line)
            .fetch_optional(&self.pool)
            .await?
        {
            return conversation_from_row(&row);
        }

        let fresh = Conversation::new(
            tenant_id,
            customer_identity,
            phone_line_id.cloned(),
            now,
        );
        // INSERT OR IGNORE + re-select: a concurrent creator for the same
        // identity wins and we adopt its row.
        sqlx::query(
            "INSERT OR IGNORE INTO conversation \
             (id, tenant_id, phone_line_id, customer_identity, control_state, \
              controlling_agent_id, last_control_change_at, unread_count, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, 0, ?7)",
        )
        .bind(&fresh.id.0)
        .bind(tenant_id)
        .bind(line)
        .bind(customer_identity)
        .bind(fresh.control_state.as_str())
        .bind(fresh.last_control_change_at)
        .bind(fresh.created_at)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(&select)
            .bind(tenant_id)
            .bind(customer_identity)
            .bind(line)
            .fetch_one(&self.pool)
            .await?;
        conversation_from_row(&row)
    }

    async fn record_customer_activity(
        &self,
        id: &ConversationId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE conversation SET last_customer_activity_at = ?2, \
             unread_count = unread_count + 1 WHERE id = ?1",
        )
        .bind(&id.0)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_agent_activity(
        &self,
        id: &ConversationId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE conversation SET last_agent_activity_at = ?2 WHERE id = ?1")
            .bind(&id.0)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn compare_and_set_control(
        &self,
        id: &ConversationId,
        expected: ControlState,
        change: &ControlChange,
    ) -> Result<CasOutcome, RepositoryError> {
        let result = sqlx::query(
            "UPDATE conversation SET control_state = ?2, controlling_agent_id = ?3, \
             last_control_change_at = ?4 WHERE id = ?1 AND control_state = ?5",
        )
        .bind(&id.0)
        .bind(change.next.as_str())
        .bind(change.agent.as_ref().map(|agent| agent.0.as_str()))
        .bind(change.at)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(CasOutcome::Stale)
        } else {
            Ok(CasOutcome::Applied)
        }
    }

    async fn decrement_unread(
        &self,
        id: &ConversationId,
        by: i64,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE conversation SET unread_count = MAX(0, unread_count - ?2) WHERE id = ?1")
            .bind(&id.0)
            .bind(by.max(0))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_by_control_state(
        &self,
        state: ControlState,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE control_state = ?1 AND archived_at IS NULL"
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(conversation_from_row).collect()
    }
}
