//! Conversation ownership arbitration. Every transition goes through the
//! repository's compare-and-set so concurrent takeover attempts resolve to
//! exactly one winner, and every applied transition leaves one audit event.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};

use switchboard_core::domain::conversation::{AgentId, ControlState, ConversationId};
use switchboard_core::domain::handoff::{HandoffEvent, HandoffReason};
use switchboard_core::domain::message::Sender;
use switchboard_core::domain::notification::NotificationCategory;
use switchboard_core::events::ConversationEvent;
use switchboard_core::session::SessionView;
use switchboard_db::repositories::{
    CasOutcome, ControlChange, ConversationRepository, HandoffEventRepository, RepositoryError,
};
use switchboard_telephony::notify::{Notification, NotificationDispatcher};

use crate::outbound::SendService;
use crate::realtime::RealtimeHub;

const HANDBACK_CUSTOMER_TEXT: &str =
    "You're back with our automated assistant. Reply here any time and a person can rejoin.";

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("conversation `{0}` not found")]
    ConversationNotFound(String),
    #[error("conversation `{conversation_id}` control state changed, please retry")]
    Stale { conversation_id: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct ControlService {
    conversations: Arc<dyn ConversationRepository>,
    handoffs: Arc<dyn HandoffEventRepository>,
    hub: Arc<RealtimeHub>,
    notifier: Arc<NotificationDispatcher>,
    sender: Arc<SendService>,
    inactivity_window: Duration,
}

impl ControlService {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        handoffs: Arc<dyn HandoffEventRepository>,
        hub: Arc<RealtimeHub>,
        notifier: Arc<NotificationDispatcher>,
        sender: Arc<SendService>,
        inactivity_window: Duration,
    ) -> Self {
        Self { conversations, handoffs, hub, notifier, sender, inactivity_window }
    }

    /// AI → human. Loses cleanly when another writer got there first.
    pub async fn request_handoff(
        &self,
        conversation_id: &ConversationId,
        agent: AgentId,
        reason: HandoffReason,
        now: DateTime<Utc>,
    ) -> Result<HandoffEvent, ControlError> {
        let conversation = self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| ControlError::ConversationNotFound(conversation_id.0.clone()))?;

        let change =
            ControlChange { next: ControlState::Human, agent: Some(agent.clone()), at: now };
        match self.conversations.compare_and_set_control(conversation_id, ControlState::Ai, &change).await? {
            CasOutcome::Applied => {}
            CasOutcome::Stale => {
                return Err(ControlError::Stale { conversation_id: conversation_id.0.clone() })
            }
        }

        let event = HandoffEvent::new(
            conversation_id.clone(),
            ControlState::Ai,
            ControlState::Human,
            reason,
            Some(agent.clone()),
            now,
        );
        self.handoffs.append(&event).await?;

        self.hub.publish(ConversationEvent::ControlChanged {
            conversation_id: conversation_id.clone(),
            control_state: ControlState::Human,
            controlling_agent_id: Some(agent.clone()),
        });
        info!(
            event_name = "control.handoff",
            conversation_id = %conversation_id.0,
            agent_id = %agent.0,
            reason = reason.as_str(),
            "conversation handed to a human"
        );

        let body = format!(
            "{} asked for a human ({})",
            conversation.customer_identity,
            reason.as_str()
        );
        self.notify(NotificationCategory::Handoff, body).await;

        Ok(event)
    }

    /// Human → AI, with an optional context summary preserved for the AI's
    /// next turn and an optional courtesy message to the customer.
    pub async fn handback(
        &self,
        conversation_id: &ConversationId,
        actor: Option<AgentId>,
        reason: HandoffReason,
        context_summary: Option<String>,
        notify_customer: bool,
        now: DateTime<Utc>,
    ) -> Result<HandoffEvent, ControlError> {
        let conversation = self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| ControlError::ConversationNotFound(conversation_id.0.clone()))?;

        let change = ControlChange { next: ControlState::Ai, agent: None, at: now };
        match self
            .conversations
            .compare_and_set_control(conversation_id, ControlState::Human, &change)
            .await?
        {
            CasOutcome::Applied => {}
            CasOutcome::Stale => {
                return Err(ControlError::Stale { conversation_id: conversation_id.0.clone() })
            }
        }

        let actor = actor.or(conversation.controlling_agent_id);
        let event = HandoffEvent::new(
            conversation_id.clone(),
            ControlState::Human,
            ControlState::Ai,
            reason,
            actor,
            now,
        )
        .with_context_summary(context_summary);
        self.handoffs.append(&event).await?;

        self.hub.publish(ConversationEvent::ControlChanged {
            conversation_id: conversation_id.clone(),
            control_state: ControlState::Ai,
            controlling_agent_id: None,
        });
        info!(
            event_name = "control.handback",
            conversation_id = %conversation_id.0,
            reason = reason.as_str(),
            has_context = event.context_summary.is_some(),
            "conversation returned to the assistant"
        );

        let category = if reason == HandoffReason::Timeout {
            NotificationCategory::Timeout
        } else {
            NotificationCategory::Return
        };
        let body = format!(
            "Conversation with {} is back with the assistant ({})",
            conversation.customer_identity,
            reason.as_str()
        );
        self.notify(category, body).await;

        if notify_customer {
            let sent = self
                .sender
                .send(
                    conversation_id,
                    Sender::Ai,
                    HANDBACK_CUSTOMER_TEXT,
                    &SessionView::default(),
                    now,
                )
                .await;
            if let Err(error) = sent {
                warn!(
                    event_name = "control.handback_notice_failed",
                    conversation_id = %conversation_id.0,
                    error = %error,
                    "could not tell the customer the assistant is back"
                );
            }
        }

        Ok(event)
    }

    /// Returns every human-controlled conversation whose inactivity window
    /// has elapsed. Losing a race to a concurrent manual handback is fine;
    /// the conversation is already where the sweep wanted it.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<usize, ControlError> {
        let held = self.conversations.list_by_control_state(ControlState::Human).await?;
        let mut returned = 0;
        for conversation in held {
            if !conversation.handback_due(now, self.inactivity_window) {
                continue;
            }
            match self
                .handback(&conversation.id, None, HandoffReason::Timeout, None, false, now)
                .await
            {
                Ok(_) => returned += 1,
                Err(ControlError::Stale { .. }) => {}
                Err(error) => return Err(error),
            }
        }
        if returned > 0 {
            info!(
                event_name = "control.sweep",
                returned,
                "timeout sweep returned conversations to the assistant"
            );
        }
        Ok(returned)
    }

    async fn notify(&self, category: NotificationCategory, body: String) {
        if let Err(error) = self.notifier.dispatch(&Notification::new(category, body)).await {
            warn!(
                event_name = "control.notify_failed",
                category = category.as_str(),
                error = %error,
                "operator notification failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use switchboard_core::domain::conversation::{AgentId, ControlState, Conversation};
    use switchboard_core::domain::handoff::HandoffReason;
    use switchboard_core::lines::{LineConfig, LineRegistry};
    use switchboard_db::repositories::{
        ConversationRepository, HandoffEventRepository, InMemoryConversationRepository,
        InMemoryHandoffEventRepository, InMemoryMessageRepository,
    };
    use switchboard_telephony::gateway::{NoopPushGateway, NoopSmsGateway};
    use switchboard_telephony::notify::NotificationDispatcher;

    use super::{ControlError, ControlService};
    use crate::bootstrap::RepositoryPreferenceSource;
    use crate::outbound::SendService;
    use crate::realtime::RealtimeHub;

    struct Fixture {
        conversations: Arc<InMemoryConversationRepository>,
        handoffs: Arc<InMemoryHandoffEventRepository>,
        service: ControlService,
    }

    fn fixture() -> Fixture {
        let conversations = Arc::new(InMemoryConversationRepository::new());
        let handoffs = Arc::new(InMemoryHandoffEventRepository::new());
        let registry = Arc::new(
            LineRegistry::from_config(&[LineConfig {
                phone_number: "+15550001111".to_string(),
                label: "main".to_string(),
                id: Some("main".to_string()),
                tenant: None,
                send: true,
                receive: true,
                default_send: true,
            }])
            .expect("registry"),
        );
        let sender = Arc::new(SendService::new(
            conversations.clone(),
            Arc::new(InMemoryMessageRepository::new()),
            Arc::new(NoopSmsGateway::new()),
            registry,
        ));
        let notifier = Arc::new(NotificationDispatcher::new(
            Box::new(RepositoryPreferenceSource::new(Arc::new(
                switchboard_db::repositories::InMemoryNotificationPreferenceRepository::new(),
            ))),
            Box::new(NoopSmsGateway::new()),
            Box::new(NoopPushGateway::new()),
            "op-1",
            None,
            None,
        ));
        let service = ControlService::new(
            conversations.clone(),
            handoffs.clone(),
            Arc::new(RealtimeHub::new()),
            notifier,
            sender,
            Duration::hours(12),
        );
        Fixture { conversations, handoffs, service }
    }

    async fn conversation(fixture: &Fixture) -> Conversation {
        fixture
            .conversations
            .find_or_create("default", "+15550009999", None, Utc::now())
            .await
            .expect("create")
    }

    #[tokio::test]
    async fn racing_handoffs_produce_one_winner_and_one_audit_event() {
        let fixture = fixture();
        let conversation = conversation(&fixture).await;
        let now = Utc::now();

        let first = fixture
            .service
            .request_handoff(&conversation.id, AgentId("42".to_string()), HandoffReason::Manual, now)
            .await;
        let second = fixture
            .service
            .request_handoff(&conversation.id, AgentId("43".to_string()), HandoffReason::Manual, now)
            .await;

        assert!(first.is_ok());
        assert!(matches!(second, Err(ControlError::Stale { .. })));

        let stored =
            fixture.conversations.find_by_id(&conversation.id).await.expect("find").expect("exists");
        assert_eq!(stored.controlling_agent_id, Some(AgentId("42".to_string())));

        let log = fixture.handoffs.list_for_conversation(&conversation.id).await.expect("list");
        assert_eq!(log.len(), 1, "the losing attempt must not leave an audit event");
    }

    #[tokio::test]
    async fn handback_preserves_the_context_summary() {
        let fixture = fixture();
        let conversation = conversation(&fixture).await;
        let now = Utc::now();

        fixture
            .service
            .request_handoff(&conversation.id, AgentId("42".to_string()), HandoffReason::Manual, now)
            .await
            .expect("handoff");
        let event = fixture
            .service
            .handback(
                &conversation.id,
                None,
                HandoffReason::Manual,
                Some("promised a callback tomorrow morning".to_string()),
                false,
                now,
            )
            .await
            .expect("handback");

        assert_eq!(event.context_summary.as_deref(), Some("promised a callback tomorrow morning"));
        assert_eq!(event.actor_id, Some(AgentId("42".to_string())), "actor defaults to the holder");

        let stored =
            fixture.conversations.find_by_id(&conversation.id).await.expect("find").expect("exists");
        assert_eq!(stored.control_state, ControlState::Ai);
        assert!(stored.controlling_agent_id.is_none());
    }

    #[tokio::test]
    async fn handback_of_an_ai_conversation_is_stale() {
        let fixture = fixture();
        let conversation = conversation(&fixture).await;

        let result = fixture
            .service
            .handback(&conversation.id, None, HandoffReason::Manual, None, false, Utc::now())
            .await;
        assert!(matches!(result, Err(ControlError::Stale { .. })));
    }

    #[tokio::test]
    async fn sweep_returns_overdue_conversations_exactly_once() {
        let fixture = fixture();
        let conversation = conversation(&fixture).await;
        let handed_at = Utc::now() - Duration::hours(13);

        fixture
            .service
            .request_handoff(
                &conversation.id,
                AgentId("42".to_string()),
                HandoffReason::CustomerRequest,
                handed_at,
            )
            .await
            .expect("handoff");

        let now = Utc::now();
        assert_eq!(fixture.service.sweep_at(now).await.expect("sweep"), 1);
        assert_eq!(fixture.service.sweep_at(now).await.expect("sweep again"), 0, "idempotent");

        let log = fixture.handoffs.list_for_conversation(&conversation.id).await.expect("list");
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].reason, HandoffReason::Timeout);
    }

    #[tokio::test]
    async fn recent_agent_activity_defers_the_sweep() {
        let fixture = fixture();
        let conversation = conversation(&fixture).await;
        let handed_at = Utc::now() - Duration::hours(13);

        fixture
            .service
            .request_handoff(
                &conversation.id,
                AgentId("42".to_string()),
                HandoffReason::Manual,
                handed_at,
            )
            .await
            .expect("handoff");
        fixture
            .conversations
            .record_agent_activity(&conversation.id, Utc::now() - Duration::hours(1))
            .await
            .expect("activity");

        assert_eq!(fixture.service.sweep_at(Utc::now()).await.expect("sweep"), 0);
        let stored =
            fixture.conversations.find_by_id(&conversation.id).await.expect("find").expect("exists");
        assert_eq!(stored.control_state, ControlState::Human, "agent is still active");
    }
}
