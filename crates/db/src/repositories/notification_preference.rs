use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use switchboard_core::domain::notification::{
    ChannelToggles, NotificationCategory, NotificationPreferences,
};

use super::{decode_field, NotificationPreferenceRepository, RepositoryError};
use crate::DbPool;

pub struct SqlNotificationPreferenceRepository {
    pool: DbPool,
}

impl SqlNotificationPreferenceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationPreferenceRepository for SqlNotificationPreferenceRepository {
    async fn load(&self, operator_id: &str) -> Result<NotificationPreferences, RepositoryError> {
        let rows = sqlx::query(
            "SELECT category, sms_enabled, push_enabled FROM notification_preference \
             WHERE operator_id = ?1",
        )
        .bind(operator_id)
        .fetch_all(&self.pool)
        .await?;

        // An operator who never saved preferences gets everything enabled.
        let mut preferences = NotificationPreferences::all_enabled();
        for row in rows {
            let category: String = row.try_get("category")?;
            let category = decode_field(&category, NotificationCategory::parse, "category")?;
            let sms: i64 = row.try_get("sms_enabled")?;
            let push: i64 = row.try_get("push_enabled")?;
            preferences.set(category, ChannelToggles { sms: sms != 0, push: push != 0 });
        }
        Ok(preferences)
    }

    async fn store(
        &self,
        operator_id: &str,
        preferences: &NotificationPreferences,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM notification_preference WHERE operator_id = ?1")
            .bind(operator_id)
            .execute(&mut *tx)
            .await?;
        for (category, toggles) in preferences.iter() {
            sqlx::query(
                "INSERT INTO notification_preference \
                 (operator_id, category, sms_enabled, push_enabled, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(operator_id)
            .bind(category.as_str())
            .bind(toggles.sms as i64)
            .bind(toggles.push as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use switchboard_core::domain::notification::{
        ChannelToggles, NotificationCategory, NotificationPreferences,
    };

    use super::SqlNotificationPreferenceRepository;
    use crate::migrations::run_pending;
    use crate::repositories::NotificationPreferenceRepository;
    use crate::{connect_with_settings, DbPool};

    async fn pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn unknown_operator_defaults_to_all_enabled() {
        let repo = SqlNotificationPreferenceRepository::new(pool().await);
        let loaded = repo.load("op-1").await.expect("load");
        assert_eq!(loaded, NotificationPreferences::all_enabled());
    }

    #[tokio::test]
    async fn store_replaces_the_full_matrix() {
        let repo = SqlNotificationPreferenceRepository::new(pool().await);

        let mut first = NotificationPreferences::all_enabled();
        first.set(NotificationCategory::Timeout, ChannelToggles { sms: false, push: true });
        repo.store("op-1", &first, Utc::now()).await.expect("store");

        let mut second = NotificationPreferences::all_enabled();
        second.set(NotificationCategory::Voicemail, ChannelToggles { sms: false, push: false });
        repo.store("op-1", &second, Utc::now()).await.expect("restore");

        let loaded = repo.load("op-1").await.expect("load");
        assert_eq!(loaded, second, "earlier timeout override must not survive the rewrite");
        assert!(loaded.for_category(NotificationCategory::Timeout).sms);
    }
}
