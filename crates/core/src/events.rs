use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::conversation::{AgentId, ControlState, ConversationId};
use crate::domain::message::{Channel, MessageId, Sender};

/// Server → client events on the realtime channel. Delivery is at-most-once
/// and unordered across conversations; receivers apply `MessagesRead` by id
/// set membership (read is terminal, so out-of-order batches converge) and
/// reconcile via full refetch when events are missed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConversationEvent {
    MessageReceived {
        conversation_id: ConversationId,
        message_id: MessageId,
        channel: Channel,
    },
    MessagesRead {
        conversation_id: ConversationId,
        message_ids: Vec<MessageId>,
        reader: Sender,
        read_at: DateTime<Utc>,
    },
    ControlChanged {
        conversation_id: ConversationId,
        control_state: ControlState,
        controlling_agent_id: Option<AgentId>,
    },
}

impl ConversationEvent {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::MessageReceived { conversation_id, .. }
            | Self::MessagesRead { conversation_id, .. }
            | Self::ControlChanged { conversation_id, .. } => conversation_id,
        }
    }
}
