//! In-memory repository implementations for tests and service-level unit
//! coverage that does not need a database file.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use switchboard_core::domain::conversation::{ControlState, Conversation, ConversationId};
use switchboard_core::domain::handoff::HandoffEvent;
use switchboard_core::domain::line::LineId;
use switchboard_core::domain::message::{DeliveryStatus, Message, MessageId, Sender};
use switchboard_core::domain::notification::NotificationPreferences;

use super::{
    CasOutcome, ControlChange, ConversationRepository, HandoffEventRepository, InsertOutcome,
    MessageRepository, NotificationPreferenceRepository, RepositoryError,
};

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<ConversationId, Conversation>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn same_line(a: Option<&LineId>, b: Option<&LineId>) -> bool {
    a.map(|id| id.0.as_str()).unwrap_or("") == b.map(|id| id.0.as_str()).unwrap_or("")
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_by_id(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.conversations.read().await.get(id).cloned())
    }

    async fn find_or_create(
        &self,
        tenant_id: &str,
        customer_identity: &str,
        phone_line_id: Option<&LineId>,
        now: DateTime<Utc>,
    ) -> Result<Conversation, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        if let Some(existing) = conversations.values().find(|conversation| {
            conversation.tenant_id == tenant_id
                && conversation.customer_identity == customer_identity
                && same_line(conversation.phone_line_id.as_ref(), phone_line_id)
        }) {
            return Ok(existing.clone());
        }
        let fresh = Conversation::new(tenant_id, customer_identity, phone_line_id.cloned(), now);
        conversations.insert(fresh.id.clone(), fresh.clone());
        Ok(fresh)
    }

    async fn record_customer_activity(
        &self,
        id: &ConversationId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        if let Some(conversation) = conversations.get_mut(id) {
            conversation.last_customer_activity_at = Some(at);
            conversation.unread_count += 1;
        }
        Ok(())
    }

    async fn record_agent_activity(
        &self,
        id: &ConversationId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        if let Some(conversation) = conversations.get_mut(id) {
            conversation.last_agent_activity_at = Some(at);
        }
        Ok(())
    }

    async fn compare_and_set_control(
        &self,
        id: &ConversationId,
        expected: ControlState,
        change: &ControlChange,
    ) -> Result<CasOutcome, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        match conversations.get_mut(id) {
            Some(conversation) if conversation.control_state == expected => {
                conversation.control_state = change.next;
                conversation.controlling_agent_id = change.agent.clone();
                conversation.last_control_change_at = change.at;
                Ok(CasOutcome::Applied)
            }
            _ => Ok(CasOutcome::Stale),
        }
    }

    async fn decrement_unread(
        &self,
        id: &ConversationId,
        by: i64,
    ) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        if let Some(conversation) = conversations.get_mut(id) {
            conversation.unread_count = (conversation.unread_count - by.max(0)).max(0);
        }
        Ok(())
    }

    async fn list_by_control_state(
        &self,
        state: ControlState,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .values()
            .filter(|conversation| {
                conversation.control_state == state && conversation.archived_at.is_none()
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<Vec<Message>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn insert(&self, message: &Message) -> Result<InsertOutcome, RepositoryError> {
        let mut messages = self.messages.write().await;
        if let Some(provider_id) = message.provider_message_id.as_deref() {
            if let Some(existing) = messages
                .iter()
                .find(|stored| stored.provider_message_id.as_deref() == Some(provider_id))
            {
                return Ok(InsertOutcome::Duplicate(existing.clone()));
            }
        }
        messages.push(message.clone());
        Ok(InsertOutcome::Inserted(message.clone()))
    }

    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages.iter().find(|message| &message.id == id).cloned())
    }

    async fn find_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .find(|message| message.provider_message_id.as_deref() == Some(provider_message_id))
            .cloned())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let mut matching: Vec<Message> = messages
            .iter()
            .filter(|message| &message.conversation_id == conversation_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(matching)
    }

    async fn mark_read(
        &self,
        conversation_id: &ConversationId,
        message_ids: &[MessageId],
        reader: Sender,
        at: DateTime<Utc>,
    ) -> Result<Vec<MessageId>, RepositoryError> {
        let mut messages = self.messages.write().await;
        let mut updated = Vec::new();
        for id in message_ids {
            let Some(message) = messages.iter_mut().find(|message| {
                &message.id == id && &message.conversation_id == conversation_id
            }) else {
                continue;
            };
            if message.sender == reader {
                continue;
            }
            if !matches!(
                message.delivery_status,
                DeliveryStatus::Sent | DeliveryStatus::Delivered
            ) {
                continue;
            }
            message.delivery_status = DeliveryStatus::Read;
            message.read_at = Some(at);
            updated.push(id.clone());
        }
        Ok(updated)
    }

    async fn attach_provider_id(
        &self,
        id: &MessageId,
        provider_message_id: &str,
    ) -> Result<(), RepositoryError> {
        let mut messages = self.messages.write().await;
        if let Some(message) = messages.iter_mut().find(|message| &message.id == id) {
            message.provider_message_id = Some(provider_message_id.to_string());
        }
        Ok(())
    }

    async fn set_delivery_status(
        &self,
        provider_message_id: &str,
        next: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut messages = self.messages.write().await;
        let Some(message) = messages
            .iter_mut()
            .find(|message| message.provider_message_id.as_deref() == Some(provider_message_id))
        else {
            return Ok(false);
        };
        if !message.delivery_status.can_advance(next) {
            return Ok(false);
        }
        message.delivery_status = next;
        if next == DeliveryStatus::Read {
            message.read_at = Some(at);
        }
        Ok(true)
    }
}

#[derive(Default)]
pub struct InMemoryHandoffEventRepository {
    events: RwLock<Vec<HandoffEvent>>,
}

impl InMemoryHandoffEventRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HandoffEventRepository for InMemoryHandoffEventRepository {
    async fn append(&self, event: &HandoffEvent) -> Result<(), RepositoryError> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<HandoffEvent>, RepositoryError> {
        let events = self.events.read().await;
        let mut matching: Vec<HandoffEvent> = events
            .iter()
            .filter(|event| &event.conversation_id == conversation_id)
            .cloned()
            .collect();
        matching.sort_by_key(|event| event.occurred_at);
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryNotificationPreferenceRepository {
    preferences: RwLock<HashMap<String, NotificationPreferences>>,
}

impl InMemoryNotificationPreferenceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationPreferenceRepository for InMemoryNotificationPreferenceRepository {
    async fn load(&self, operator_id: &str) -> Result<NotificationPreferences, RepositoryError> {
        let preferences = self.preferences.read().await;
        Ok(preferences
            .get(operator_id)
            .cloned()
            .unwrap_or_else(NotificationPreferences::all_enabled))
    }

    async fn store(
        &self,
        operator_id: &str,
        preferences: &NotificationPreferences,
        _now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.preferences
            .write()
            .await
            .insert(operator_id.to_string(), preferences.clone());
        Ok(())
    }
}
