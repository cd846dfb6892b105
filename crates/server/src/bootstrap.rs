use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use thiserror::Error;
use tracing::info;

use switchboard_core::config::{AppConfig, ConfigError, LoadOptions};
use switchboard_core::control::HandoffPolicy;
use switchboard_core::domain::conversation::AgentId;
use switchboard_core::domain::notification::NotificationPreferences;
use switchboard_core::lines::{LineRegistry, LineRegistryError};
use switchboard_db::repositories::{
    ConversationRepository, HandoffEventRepository, MessageRepository,
    NotificationPreferenceRepository, SqlConversationRepository, SqlHandoffEventRepository,
    SqlMessageRepository, SqlNotificationPreferenceRepository,
};
use switchboard_db::{connect_with_settings, migrations, DbPool};
use switchboard_telephony::gateway::{
    HttpSmsGateway, NoopPushGateway, NoopSmsGateway, SmsGateway,
};
use switchboard_telephony::notify::{NotificationDispatcher, NotifyError, PreferenceSource};

use crate::control::ControlService;
use crate::ingest::IngestService;
use crate::outbound::SendService;
use crate::realtime::RealtimeHub;
use crate::receipts::ReceiptService;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub registry: Arc<LineRegistry>,
    pub hub: Arc<RealtimeHub>,
    pub ingest: Arc<IngestService>,
    pub control: Arc<ControlService>,
    pub receipts: Arc<ReceiptService>,
    pub sender: Arc<SendService>,
    pub preferences: Arc<dyn NotificationPreferenceRepository>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("phone line configuration rejected: {0}")]
    Lines(#[from] LineRegistryError),
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application").field("lines", &self.registry.len()).finish_non_exhaustive()
    }
}

/// Adapts the preference repository to the notification dispatcher's
/// read-side trait, so the telephony crate stays database-free.
pub struct RepositoryPreferenceSource {
    repository: Arc<dyn NotificationPreferenceRepository>,
}

impl RepositoryPreferenceSource {
    pub fn new(repository: Arc<dyn NotificationPreferenceRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl PreferenceSource for RepositoryPreferenceSource {
    async fn preferences_for(
        &self,
        operator_id: &str,
    ) -> Result<NotificationPreferences, NotifyError> {
        self.repository.load(operator_id).await.map_err(|error| NotifyError::Preferences {
            operator_id: operator_id.to_string(),
            message: error.to_string(),
        })
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let registry = Arc::new(LineRegistry::from_config(&config.lines)?);
    info!(
        event_name = "system.bootstrap.lines_loaded",
        lines = registry.len(),
        "phone line registry built"
    );

    let conversations: Arc<dyn ConversationRepository> =
        Arc::new(SqlConversationRepository::new(db_pool.clone()));
    let messages: Arc<dyn MessageRepository> =
        Arc::new(SqlMessageRepository::new(db_pool.clone()));
    let handoffs: Arc<dyn HandoffEventRepository> =
        Arc::new(SqlHandoffEventRepository::new(db_pool.clone()));
    let preferences: Arc<dyn NotificationPreferenceRepository> =
        Arc::new(SqlNotificationPreferenceRepository::new(db_pool.clone()));

    let hub = Arc::new(RealtimeHub::new());
    let sms_from = registry.default_send_line().ok().map(|line| line.phone_number.clone());
    let notifier = Arc::new(NotificationDispatcher::new(
        Box::new(RepositoryPreferenceSource::new(preferences.clone())),
        boxed_sms_gateway(&config),
        Box::new(NoopPushGateway::new()),
        config.notifications.operator_id.clone(),
        config.notifications.operator_phone.clone(),
        sms_from,
    ));

    let sender = Arc::new(SendService::new(
        conversations.clone(),
        messages.clone(),
        shared_sms_gateway(&config),
        registry.clone(),
    ));
    let control = Arc::new(ControlService::new(
        conversations.clone(),
        handoffs.clone(),
        hub.clone(),
        notifier.clone(),
        sender.clone(),
        Duration::minutes(config.handoff.inactivity_window_mins),
    ));
    let receipts = Arc::new(ReceiptService::new(
        conversations.clone(),
        messages.clone(),
        hub.clone(),
    ));
    let ingest = Arc::new(IngestService::new(
        registry.clone(),
        conversations,
        messages,
        hub.clone(),
        control.clone(),
        notifier,
        HandoffPolicy::default(),
        AgentId(config.handoff.default_agent_id.clone()),
    ));

    Ok(Application {
        config,
        db_pool,
        registry,
        hub,
        ingest,
        control,
        receipts,
        sender,
        preferences,
    })
}

fn http_gateway(config: &AppConfig) -> Option<HttpSmsGateway> {
    match (&config.telephony.base_url, &config.telephony.account_id, &config.telephony.auth_token)
    {
        (Some(base_url), Some(account_id), Some(auth_token)) => {
            Some(HttpSmsGateway::new(base_url.clone(), account_id.clone(), auth_token.clone()))
        }
        _ => None,
    }
}

fn shared_sms_gateway(config: &AppConfig) -> Arc<dyn SmsGateway> {
    match http_gateway(config) {
        Some(gateway) => {
            info!(event_name = "system.bootstrap.sms_gateway", mode = "http", "sms gateway ready");
            Arc::new(gateway)
        }
        None => {
            info!(event_name = "system.bootstrap.sms_gateway", mode = "noop", "sms gateway ready");
            Arc::new(NoopSmsGateway::new())
        }
    }
}

fn boxed_sms_gateway(config: &AppConfig) -> Box<dyn SmsGateway> {
    match http_gateway(config) {
        Some(gateway) => Box::new(gateway),
        None => Box::new(NoopSmsGateway::new()),
    }
}

#[cfg(test)]
mod tests {
    use switchboard_core::config::{ConfigOverrides, LoadOptions};
    use switchboard_core::lines::LineConfig;

    use super::{bootstrap, BootstrapError};

    fn line(number: &str) -> LineConfig {
        LineConfig {
            phone_number: number.to_string(),
            label: "main".to_string(),
            id: Some("main".to_string()),
            tenant: None,
            send: true,
            receive: true,
            default_send: true,
        }
    }

    fn options(database_url: &str, lines: Vec<LineConfig>) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                lines: Some(lines),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_runs_migrations_and_builds_the_registry() {
        let app = bootstrap(options("sqlite::memory:?cache=shared", vec![line("+15550001111")]))
            .await
            .expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('conversation', 'message', 'handoff_event', 'notification_preference')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("baseline tables");
        assert_eq!(table_count, 4);
        assert_eq!(app.registry.len(), 1);
        assert_eq!(
            app.registry.default_send_line().expect("default line").phone_number,
            "+15550001111"
        );

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_any_configured_line() {
        let result = bootstrap(options("sqlite::memory:", Vec::new())).await;
        let message = match result {
            Err(BootstrapError::Config(error)) => error.to_string(),
            other => panic!("expected config validation failure, got {other:?}"),
        };
        assert!(message.contains("lines"), "error should name the lines section: {message}");
    }
}
