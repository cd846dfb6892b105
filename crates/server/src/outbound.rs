//! Outbound message sending. Replies leave on the conversation's own line by
//! default so the customer always sees a consistent number; an operator's
//! session can pin a different send-capable line.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use switchboard_core::domain::conversation::ConversationId;
use switchboard_core::domain::message::{Message, Sender};
use switchboard_core::lines::{LineRegistry, LineRegistryError};
use switchboard_core::session::SessionView;
use switchboard_db::repositories::{
    ConversationRepository, MessageRepository, RepositoryError,
};
use switchboard_telephony::gateway::{GatewayError, OutboundSms, SmsGateway};

#[derive(Debug, Error)]
pub enum SendError {
    #[error("conversation `{0}` not found")]
    ConversationNotFound(String),
    #[error("message body is empty")]
    EmptyBody,
    #[error(transparent)]
    NoSendLine(#[from] LineRegistryError),
    #[error("provider send failed: {0}")]
    Gateway(#[source] GatewayError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct SendService {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    gateway: Arc<dyn SmsGateway>,
    registry: Arc<LineRegistry>,
}

impl SendService {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        gateway: Arc<dyn SmsGateway>,
        registry: Arc<LineRegistry>,
    ) -> Self {
        Self { conversations, messages, gateway, registry }
    }

    pub async fn send(
        &self,
        conversation_id: &ConversationId,
        sender: Sender,
        body: &str,
        session: &SessionView,
        now: DateTime<Utc>,
    ) -> Result<Message, SendError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(SendError::EmptyBody);
        }

        let conversation = self
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| SendError::ConversationNotFound(conversation_id.0.clone()))?;

        let line = if session.active_send_line.is_some() {
            session.effective_send_line(&self.registry)?
        } else {
            conversation
                .phone_line_id
                .as_ref()
                .and_then(|id| self.registry.line_by_id(id))
                .filter(|line| line.is_send_capable)
                .map(Ok)
                .unwrap_or_else(|| self.registry.default_send_line())?
        };

        let mut message =
            Message::outbound(conversation.id.clone(), sender, body, Some(line.id.clone()), now);
        let sms = OutboundSms {
            to: conversation.customer_identity.clone(),
            from: line.phone_number.clone(),
            body: body.to_string(),
        };

        match self.gateway.send_sms(&sms).await {
            Ok(provider_message_id) => {
                message.provider_message_id = Some(provider_message_id);
                self.messages.insert(&message).await?;
                if sender == Sender::Agent {
                    self.conversations.record_agent_activity(&conversation.id, now).await?;
                }
                info!(
                    event_name = "outbound.sent",
                    conversation_id = %conversation.id.0,
                    message_id = %message.id.0,
                    line = %line.id.0,
                    sender = sender.as_str(),
                    "outbound message accepted by provider"
                );
                Ok(message)
            }
            Err(error) => {
                // The failed row stays in the transcript so the operator can
                // see and retry what never reached the customer.
                message.delivery_status =
                    switchboard_core::domain::message::DeliveryStatus::Failed;
                self.messages.insert(&message).await?;
                warn!(
                    event_name = "outbound.failed",
                    conversation_id = %conversation.id.0,
                    message_id = %message.id.0,
                    error = %error,
                    "outbound message rejected by provider"
                );
                Err(SendError::Gateway(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::Utc;

    use switchboard_core::domain::line::LineId;
    use switchboard_core::domain::message::{DeliveryStatus, Sender};
    use switchboard_core::lines::{LineConfig, LineRegistry};
    use switchboard_core::session::SessionView;
    use switchboard_db::repositories::{
        ConversationRepository, InMemoryConversationRepository, InMemoryMessageRepository,
        MessageRepository,
    };
    use switchboard_telephony::gateway::{GatewayError, OutboundSms, SmsGateway};

    use super::{SendError, SendService};

    #[derive(Clone, Default)]
    struct RecordingGateway {
        sent: Arc<Mutex<Vec<OutboundSms>>>,
        fail: bool,
    }

    #[async_trait]
    impl SmsGateway for RecordingGateway {
        async fn send_sms(&self, sms: &OutboundSms) -> Result<String, GatewayError> {
            if self.fail {
                return Err(GatewayError::MissingCredentials);
            }
            self.sent.lock().unwrap().push(sms.clone());
            Ok(format!("SM-{}", self.sent.lock().unwrap().len()))
        }
    }

    fn registry() -> Arc<LineRegistry> {
        let line = |number: &str, id: &str, default_send: bool| LineConfig {
            phone_number: number.to_string(),
            label: id.to_string(),
            id: Some(id.to_string()),
            tenant: None,
            send: true,
            receive: true,
            default_send,
        };
        Arc::new(
            LineRegistry::from_config(&[
                line("+15550001111", "main", true),
                line("+15550002222", "campaigns", false),
            ])
            .expect("registry"),
        )
    }

    struct Fixture {
        conversations: Arc<InMemoryConversationRepository>,
        messages: Arc<InMemoryMessageRepository>,
        gateway: RecordingGateway,
        service: SendService,
    }

    fn fixture(fail: bool) -> Fixture {
        let conversations = Arc::new(InMemoryConversationRepository::new());
        let messages = Arc::new(InMemoryMessageRepository::new());
        let gateway = RecordingGateway { fail, ..RecordingGateway::default() };
        let service = SendService::new(
            conversations.clone(),
            messages.clone(),
            Arc::new(gateway.clone()),
            registry(),
        );
        Fixture { conversations, messages, gateway, service }
    }

    #[tokio::test]
    async fn replies_use_the_conversation_line_by_default() {
        let fixture = fixture(false);
        let conversation = fixture
            .conversations
            .find_or_create(
                "default",
                "+15550009999",
                Some(&LineId("campaigns".to_string())),
                Utc::now(),
            )
            .await
            .expect("create");

        let message = fixture
            .service
            .send(&conversation.id, Sender::Agent, "on our way", &SessionView::default(), Utc::now())
            .await
            .expect("send");

        let sent = fixture.gateway.sent.lock().unwrap();
        assert_eq!(sent[0].from, "+15550002222", "conversation line, not the default");
        assert_eq!(sent[0].to, "+15550009999");
        assert_eq!(message.phone_line_id, Some(LineId("campaigns".to_string())));
        assert!(message.provider_message_id.is_some());

        let stored = fixture
            .conversations
            .find_by_id(&conversation.id)
            .await
            .expect("find")
            .expect("exists");
        assert!(stored.last_agent_activity_at.is_some(), "agent send counts as activity");
    }

    #[tokio::test]
    async fn session_send_line_overrides_the_conversation_line() {
        let fixture = fixture(false);
        let conversation = fixture
            .conversations
            .find_or_create(
                "default",
                "+15550009999",
                Some(&LineId("campaigns".to_string())),
                Utc::now(),
            )
            .await
            .expect("create");

        let mut session = SessionView::default();
        session.set_active_send_line(LineId("main".to_string()));
        fixture
            .service
            .send(&conversation.id, Sender::Agent, "hello", &session, Utc::now())
            .await
            .expect("send");

        assert_eq!(fixture.gateway.sent.lock().unwrap()[0].from, "+15550001111");
    }

    #[tokio::test]
    async fn gateway_failure_records_a_failed_message() {
        let fixture = fixture(true);
        let conversation = fixture
            .conversations
            .find_or_create("default", "+15550009999", None, Utc::now())
            .await
            .expect("create");

        let error = fixture
            .service
            .send(&conversation.id, Sender::Ai, "hello", &SessionView::default(), Utc::now())
            .await
            .expect_err("gateway is down");
        assert!(matches!(error, SendError::Gateway(_)));

        let transcript =
            fixture.messages.list_for_conversation(&conversation.id).await.expect("list");
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].delivery_status, DeliveryStatus::Failed);
        assert!(transcript[0].provider_message_id.is_none());
    }

    #[tokio::test]
    async fn blank_bodies_are_rejected_before_any_io() {
        let fixture = fixture(false);
        let conversation = fixture
            .conversations
            .find_or_create("default", "+15550009999", None, Utc::now())
            .await
            .expect("create");

        let error = fixture
            .service
            .send(&conversation.id, Sender::Agent, "   ", &SessionView::default(), Utc::now())
            .await
            .expect_err("empty body");
        assert!(matches!(error, SendError::EmptyBody));
        assert!(fixture.gateway.sent.lock().unwrap().is_empty());
    }
}
