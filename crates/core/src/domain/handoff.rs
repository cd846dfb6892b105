use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::{AgentId, ControlState, ConversationId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandoffEventId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffReason {
    Manual,
    Timeout,
    CustomerRequest,
    AiDetectedResolution,
}

impl HandoffReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Timeout => "timeout",
            Self::CustomerRequest => "customer_request",
            Self::AiDetectedResolution => "ai_detected_resolution",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "manual" => Some(Self::Manual),
            "timeout" => Some(Self::Timeout),
            "customer_request" => Some(Self::CustomerRequest),
            "ai_detected_resolution" => Some(Self::AiDetectedResolution),
            _ => None,
        }
    }
}

/// Append-only record of one ownership transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffEvent {
    pub id: HandoffEventId,
    pub conversation_id: ConversationId,
    pub from_state: ControlState,
    pub to_state: ControlState,
    pub reason: HandoffReason,
    pub actor_id: Option<AgentId>,
    pub context_summary: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl HandoffEvent {
    pub fn new(
        conversation_id: ConversationId,
        from_state: ControlState,
        to_state: ControlState,
        reason: HandoffReason,
        actor_id: Option<AgentId>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: HandoffEventId(Uuid::new_v4().to_string()),
            conversation_id,
            from_state,
            to_state,
            reason,
            actor_id,
            context_summary: None,
            occurred_at,
        }
    }

    /// Handback events may carry a short operator-written summary preserved
    /// for the AI's next turn.
    pub fn with_context_summary(mut self, summary: Option<String>) -> Self {
        self.context_summary = summary.filter(|value| !value.trim().is_empty());
        self
    }
}
