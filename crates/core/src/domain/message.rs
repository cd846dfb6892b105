use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::ConversationId;
use crate::domain::line::LineId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    Customer,
    Agent,
    Ai,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Agent => "agent",
            Self::Ai => "ai",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "customer" => Some(Self::Customer),
            "agent" => Some(Self::Agent),
            "ai" => Some(Self::Ai),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Voice,
    Chat,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Voice => "voice",
            Self::Chat => "chat",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "sms" => Some(Self::Sms),
            "voice" => Some(Self::Voice),
            "chat" => Some(Self::Chat),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Delivery status only moves forward: sent → delivered → read, with
    /// `failed` terminal from any pre-read state and `read` terminal outright.
    pub fn can_advance(self, next: DeliveryStatus) -> bool {
        matches!(
            (self, next),
            (Self::Sent, Self::Delivered)
                | (Self::Sent, Self::Read)
                | (Self::Delivered, Self::Read)
                | (Self::Sent, Self::Failed)
                | (Self::Delivered, Self::Failed)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: Sender,
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub channel: Channel,
    pub delivery_status: DeliveryStatus,
    pub read_at: Option<DateTime<Utc>>,
    pub phone_line_id: Option<LineId>,
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// A customer message landing from a provider webhook. Inbound traffic
    /// has already reached us, so it is born `delivered`.
    pub fn inbound(
        conversation_id: ConversationId,
        channel: Channel,
        body: Option<String>,
        media_url: Option<String>,
        phone_line_id: Option<LineId>,
        provider_message_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId(Uuid::new_v4().to_string()),
            conversation_id,
            sender: Sender::Customer,
            body,
            media_url,
            channel,
            delivery_status: DeliveryStatus::Delivered,
            read_at: None,
            phone_line_id,
            provider_message_id: Some(provider_message_id.into()),
            created_at: now,
        }
    }

    /// An operator- or AI-authored message about to be handed to the
    /// provider. The provider id arrives after the send is accepted.
    pub fn outbound(
        conversation_id: ConversationId,
        sender: Sender,
        body: impl Into<String>,
        phone_line_id: Option<LineId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId(Uuid::new_v4().to_string()),
            conversation_id,
            sender,
            body: Some(body.into()),
            media_url: None,
            channel: Channel::Sms,
            delivery_status: DeliveryStatus::Sent,
            read_at: None,
            phone_line_id,
            provider_message_id: None,
            created_at: now,
        }
    }

    pub fn advance_delivery(
        &mut self,
        next: DeliveryStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.delivery_status.can_advance(next) {
            return Err(DomainError::InvalidDeliveryTransition {
                from: self.delivery_status,
                to: next,
            });
        }
        self.delivery_status = next;
        self.read_at = (next == DeliveryStatus::Read).then_some(now);
        Ok(())
    }
}
