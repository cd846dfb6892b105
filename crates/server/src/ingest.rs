//! Inbound webhook processing: line resolution, conversation routing,
//! duplicate suppression, escalation detection, and delivery-status updates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use switchboard_core::control::HandoffPolicy;
use switchboard_core::domain::conversation::{AgentId, ControlState, ConversationId};
use switchboard_core::domain::handoff::HandoffReason;
use switchboard_core::domain::message::Message;
use switchboard_core::domain::notification::NotificationCategory;
use switchboard_core::events::ConversationEvent;
use switchboard_core::lines::LineRegistry;
use switchboard_db::repositories::{
    ConversationRepository, InsertOutcome, MessageRepository, RepositoryError,
};
use switchboard_telephony::notify::{Notification, NotificationDispatcher};
use switchboard_telephony::webhook::{
    InboundSmsWebhook, InboundVoiceWebhook, NormalizedInbound, StatusCallback, WebhookError,
};

use crate::control::{ControlError, ControlService};
use crate::realtime::RealtimeHub;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no configured line matches `{0}`")]
    UnknownLine(String),
    #[error("line `{0}` does not receive inbound traffic")]
    ReceiveDisabled(String),
    #[error(transparent)]
    Webhook(#[from] WebhookError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Control(#[from] ControlError),
}

/// What a webhook delivery actually did.
#[derive(Debug)]
pub struct IngestReceipt {
    pub conversation_id: ConversationId,
    pub message: Message,
    pub duplicate: bool,
    pub escalated: bool,
}

pub struct IngestService {
    registry: Arc<LineRegistry>,
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    hub: Arc<RealtimeHub>,
    control: Arc<ControlService>,
    notifier: Arc<NotificationDispatcher>,
    policy: HandoffPolicy,
    default_agent: AgentId,
}

impl IngestService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<LineRegistry>,
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        hub: Arc<RealtimeHub>,
        control: Arc<ControlService>,
        notifier: Arc<NotificationDispatcher>,
        policy: HandoffPolicy,
        default_agent: AgentId,
    ) -> Self {
        Self { registry, conversations, messages, hub, control, notifier, policy, default_agent }
    }

    pub async fn ingest_sms(
        &self,
        webhook: &InboundSmsWebhook,
        now: DateTime<Utc>,
    ) -> Result<IngestReceipt, IngestError> {
        let inbound = NormalizedInbound::from_sms(webhook)?;
        let mut receipt = self.record(&inbound, now).await?;

        // Escalation only fires for fresh messages while the assistant is
        // still in control; replays and held conversations stay untouched.
        if !receipt.duplicate {
            receipt.escalated = self.maybe_escalate(&receipt, now).await?;
        }
        Ok(receipt)
    }

    pub async fn ingest_voice(
        &self,
        webhook: &InboundVoiceWebhook,
        now: DateTime<Utc>,
    ) -> Result<IngestReceipt, IngestError> {
        let inbound = NormalizedInbound::from_voice(webhook)?;
        let receipt = self.record(&inbound, now).await?;

        if !receipt.duplicate && webhook.is_voicemail() {
            let body = format!("New voicemail from {}", inbound.from);
            if let Err(error) =
                self.notifier.dispatch(&Notification::new(NotificationCategory::Voicemail, body)).await
            {
                warn!(
                    event_name = "ingest.voicemail_notify_failed",
                    conversation_id = %receipt.conversation_id.0,
                    error = %error,
                    "voicemail notification failed"
                );
            }
        }
        Ok(receipt)
    }

    /// Applies a provider delivery-status callback. Unknown ids and
    /// non-monotonic transitions are acknowledged and dropped.
    pub async fn apply_status(
        &self,
        callback: &StatusCallback,
        now: DateTime<Utc>,
    ) -> Result<bool, IngestError> {
        let status = callback.delivery_status()?;
        let applied =
            self.messages.set_delivery_status(&callback.message_sid, status, now).await?;
        if !applied {
            info!(
                event_name = "ingest.status_ignored",
                provider_message_id = %callback.message_sid,
                status = %callback.message_status,
                "delivery-status callback ignored"
            );
        }
        Ok(applied)
    }

    async fn record(
        &self,
        inbound: &NormalizedInbound,
        now: DateTime<Utc>,
    ) -> Result<IngestReceipt, IngestError> {
        let line = self
            .registry
            .resolve(&inbound.to)
            .map_err(|_| IngestError::UnknownLine(inbound.to.clone()))?;
        if !line.is_receive_capable {
            return Err(IngestError::ReceiveDisabled(line.id.0.clone()));
        }

        let conversation = self
            .conversations
            .find_or_create(&line.tenant_id, &inbound.from, Some(&line.id), now)
            .await?;

        let message = Message::inbound(
            conversation.id.clone(),
            inbound.channel,
            inbound.body.clone(),
            inbound.media_url.clone(),
            Some(line.id.clone()),
            inbound.provider_message_id.clone(),
            now,
        );
        let message = match self.messages.insert(&message).await? {
            InsertOutcome::Inserted(message) => message,
            InsertOutcome::Duplicate(existing) => {
                info!(
                    event_name = "ingest.duplicate",
                    conversation_id = %conversation.id.0,
                    provider_message_id = %inbound.provider_message_id,
                    "webhook replay suppressed"
                );
                return Ok(IngestReceipt {
                    conversation_id: conversation.id,
                    message: existing,
                    duplicate: true,
                    escalated: false,
                });
            }
        };

        self.conversations.record_customer_activity(&conversation.id, now).await?;
        self.hub.publish(ConversationEvent::MessageReceived {
            conversation_id: conversation.id.clone(),
            message_id: message.id.clone(),
            channel: message.channel,
        });
        info!(
            event_name = "ingest.recorded",
            conversation_id = %conversation.id.0,
            message_id = %message.id.0,
            channel = message.channel.as_str(),
            line = %line.id.0,
            "inbound message recorded"
        );

        Ok(IngestReceipt {
            conversation_id: conversation.id,
            message,
            duplicate: false,
            escalated: false,
        })
    }

    async fn maybe_escalate(
        &self,
        receipt: &IngestReceipt,
        now: DateTime<Utc>,
    ) -> Result<bool, IngestError> {
        let Some(body) = receipt.message.body.as_deref() else {
            return Ok(false);
        };
        if !self.policy.detect_escalation(body) {
            return Ok(false);
        }
        let conversation = self
            .conversations
            .find_by_id(&receipt.conversation_id)
            .await?
            .ok_or_else(|| {
                RepositoryError::Decode(format!(
                    "conversation `{}` vanished mid-ingest",
                    receipt.conversation_id.0
                ))
            })?;
        if conversation.control_state != ControlState::Ai {
            return Ok(false);
        }

        match self
            .control
            .request_handoff(
                &receipt.conversation_id,
                self.default_agent.clone(),
                HandoffReason::CustomerRequest,
                now,
            )
            .await
        {
            Ok(_) => Ok(true),
            // Someone took the conversation between our read and the CAS.
            Err(ControlError::Stale { .. }) => Ok(false),
            Err(error) => Err(error.into()),
        }
    }
}
