use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use switchboard_core::domain::conversation::{
    AgentId, ControlState, Conversation, ConversationId,
};
use switchboard_core::domain::handoff::HandoffEvent;
use switchboard_core::domain::line::LineId;
use switchboard_core::domain::message::{DeliveryStatus, Message, MessageId, Sender};
use switchboard_core::domain::notification::NotificationPreferences;

pub mod conversation;
pub mod handoff_event;
pub mod memory;
pub mod message;
pub mod notification_preference;

pub use conversation::SqlConversationRepository;
pub use handoff_event::SqlHandoffEventRepository;
pub use memory::{
    InMemoryConversationRepository, InMemoryHandoffEventRepository, InMemoryMessageRepository,
    InMemoryNotificationPreferenceRepository,
};
pub use message::SqlMessageRepository;
pub use notification_preference::SqlNotificationPreferenceRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Desired end state of a control transition, applied only if the current
/// state still matches the expected pre-state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlChange {
    pub next: ControlState,
    pub agent: Option<AgentId>,
    pub at: DateTime<Utc>,
}

/// Outcome of the optimistic control-state compare-and-set. `Stale` means a
/// concurrent transition won; the caller must re-read before retrying.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    Stale,
}

/// Outcome of a deduplicating message insert: `Duplicate` carries the row
/// previously created for the same provider message id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Message),
    Duplicate(Message),
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError>;

    /// First inbound contact from a customer identity on a line creates the
    /// conversation; later contacts return the existing one.
    async fn find_or_create(
        &self,
        tenant_id: &str,
        customer_identity: &str,
        phone_line_id: Option<&LineId>,
        now: DateTime<Utc>,
    ) -> Result<Conversation, RepositoryError>;

    async fn record_customer_activity(
        &self,
        id: &ConversationId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn record_agent_activity(
        &self,
        id: &ConversationId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn compare_and_set_control(
        &self,
        id: &ConversationId,
        expected: ControlState,
        change: &ControlChange,
    ) -> Result<CasOutcome, RepositoryError>;

    /// Decrements the unread counter, floored at zero.
    async fn decrement_unread(
        &self,
        id: &ConversationId,
        by: i64,
    ) -> Result<(), RepositoryError>;

    async fn list_by_control_state(
        &self,
        state: ControlState,
    ) -> Result<Vec<Conversation>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Inserts unless a row with the same provider message id exists.
    async fn insert(&self, message: &Message) -> Result<InsertOutcome, RepositoryError>;

    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, RepositoryError>;

    async fn find_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Message>, RepositoryError>;

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError>;

    /// Marks the given messages read on behalf of `reader`, skipping
    /// reader-authored and already-read rows. Returns the newly-read ids.
    async fn mark_read(
        &self,
        conversation_id: &ConversationId,
        message_ids: &[MessageId],
        reader: Sender,
        at: DateTime<Utc>,
    ) -> Result<Vec<MessageId>, RepositoryError>;

    /// Binds the provider-assigned id to an outbound message after the send
    /// is accepted, so later status callbacks can find it.
    async fn attach_provider_id(
        &self,
        id: &MessageId,
        provider_message_id: &str,
    ) -> Result<(), RepositoryError>;

    /// Applies a provider delivery-status callback. Returns false when the
    /// update was ignored (unknown id or non-monotonic transition).
    async fn set_delivery_status(
        &self,
        provider_message_id: &str,
        next: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait HandoffEventRepository: Send + Sync {
    async fn append(&self, event: &HandoffEvent) -> Result<(), RepositoryError>;

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<HandoffEvent>, RepositoryError>;
}

#[async_trait]
pub trait NotificationPreferenceRepository: Send + Sync {
    /// Missing rows fall back to the all-enabled default matrix.
    async fn load(&self, operator_id: &str) -> Result<NotificationPreferences, RepositoryError>;

    /// Replaces the operator's full matrix.
    async fn store(
        &self,
        operator_id: &str,
        preferences: &NotificationPreferences,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

pub(crate) fn decode_field<T>(
    raw: &str,
    parse: fn(&str) -> Option<T>,
    what: &str,
) -> Result<T, RepositoryError> {
    parse(raw).ok_or_else(|| RepositoryError::Decode(format!("unknown {what} `{raw}`")))
}
