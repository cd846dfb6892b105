use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::line::LineId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlState {
    Ai,
    Human,
}

impl ControlState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Human => "human",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ai" => Some(Self::Ai),
            "human" => Some(Self::Human),
            _ => None,
        }
    }
}

/// The unit of handoff ownership. Created on first inbound contact from a
/// customer identity on a line; soft-archived, never hard-deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub tenant_id: String,
    pub phone_line_id: Option<LineId>,
    pub customer_identity: String,
    pub control_state: ControlState,
    pub controlling_agent_id: Option<AgentId>,
    pub last_customer_activity_at: Option<DateTime<Utc>>,
    pub last_agent_activity_at: Option<DateTime<Utc>>,
    pub last_control_change_at: DateTime<Utc>,
    pub unread_count: i64,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(
        tenant_id: impl Into<String>,
        customer_identity: impl Into<String>,
        phone_line_id: Option<LineId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ConversationId(Uuid::new_v4().to_string()),
            tenant_id: tenant_id.into(),
            phone_line_id,
            customer_identity: customer_identity.into(),
            control_state: ControlState::Ai,
            controlling_agent_id: None,
            last_customer_activity_at: None,
            last_agent_activity_at: None,
            last_control_change_at: now,
            unread_count: 0,
            archived_at: None,
            created_at: now,
        }
    }

    /// AI → human. The controlling agent is set atomically with the state so
    /// the agent-id invariant can never be observed half-applied.
    pub fn begin_human_control(
        &mut self,
        agent_id: AgentId,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.control_state != ControlState::Ai {
            return Err(DomainError::StaleControlState {
                conversation_id: self.id.0.clone(),
                expected: ControlState::Ai,
            });
        }
        self.control_state = ControlState::Human;
        self.controlling_agent_id = Some(agent_id);
        self.last_control_change_at = now;
        Ok(())
    }

    /// Human → AI, clearing the controlling agent.
    pub fn return_to_ai(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.control_state != ControlState::Human {
            return Err(DomainError::StaleControlState {
                conversation_id: self.id.0.clone(),
                expected: ControlState::Human,
            });
        }
        self.control_state = ControlState::Ai;
        self.controlling_agent_id = None;
        self.last_control_change_at = now;
        Ok(())
    }

    /// Whether the inactivity window has elapsed since the later of the last
    /// control change and the last human-sent message. Only ever true for
    /// human-controlled conversations, which makes the timeout sweep
    /// idempotent by construction.
    pub fn handback_due(&self, now: DateTime<Utc>, window: Duration) -> bool {
        if self.control_state != ControlState::Human || self.archived_at.is_some() {
            return false;
        }
        let last_human_touch = match self.last_agent_activity_at {
            Some(at) if at > self.last_control_change_at => at,
            _ => self.last_control_change_at,
        };
        now - last_human_touch > window
    }

    pub fn check_invariants(&self) -> Result<(), DomainError> {
        let agent_matches_state =
            (self.control_state == ControlState::Human) == self.controlling_agent_id.is_some();
        if !agent_matches_state {
            return Err(DomainError::InvariantViolation(format!(
                "conversation {} has control_state {:?} with controlling_agent_id {:?}",
                self.id.0, self.control_state, self.controlling_agent_id
            )));
        }
        if self.unread_count < 0 {
            return Err(DomainError::InvariantViolation(format!(
                "conversation {} has negative unread_count {}",
                self.id.0, self.unread_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{AgentId, ControlState, Conversation};
    use crate::errors::DomainError;

    fn conversation() -> Conversation {
        Conversation::new("default", "+15550001111", None, Utc::now())
    }

    #[test]
    fn controlling_agent_is_set_iff_human_controlled() {
        let mut conversation = conversation();
        conversation.check_invariants().expect("fresh conversation");
        assert_eq!(conversation.control_state, ControlState::Ai);
        assert!(conversation.controlling_agent_id.is_none());

        conversation
            .begin_human_control(AgentId("42".to_string()), Utc::now())
            .expect("ai -> human");
        conversation.check_invariants().expect("human control");
        assert_eq!(conversation.controlling_agent_id, Some(AgentId("42".to_string())));

        conversation.return_to_ai(Utc::now()).expect("human -> ai");
        conversation.check_invariants().expect("back to ai");
        assert!(conversation.controlling_agent_id.is_none());
    }

    #[test]
    fn repeated_handoff_is_rejected_as_stale() {
        let mut conversation = conversation();
        conversation
            .begin_human_control(AgentId("42".to_string()), Utc::now())
            .expect("first handoff");

        let error = conversation
            .begin_human_control(AgentId("43".to_string()), Utc::now())
            .expect_err("second handoff should be stale");
        assert!(matches!(error, DomainError::StaleControlState { .. }));
        assert_eq!(conversation.controlling_agent_id, Some(AgentId("42".to_string())));
    }

    #[test]
    fn handback_due_uses_later_of_control_change_and_agent_activity() {
        let now = Utc::now();
        let mut conversation = conversation();
        conversation
            .begin_human_control(AgentId("42".to_string()), now - Duration::hours(13))
            .expect("handoff");

        assert!(conversation.handback_due(now, Duration::hours(12)));

        conversation.last_agent_activity_at = Some(now - Duration::hours(2));
        assert!(!conversation.handback_due(now, Duration::hours(12)));
    }

    #[test]
    fn handback_is_never_due_for_ai_controlled_conversations() {
        let now = Utc::now();
        let mut conversation = conversation();
        conversation.last_control_change_at = now - Duration::hours(48);
        assert!(!conversation.handback_due(now, Duration::hours(12)));

        conversation
            .begin_human_control(AgentId("42".to_string()), now - Duration::hours(48))
            .expect("handoff");
        conversation.archived_at = Some(now);
        assert!(!conversation.handback_due(now, Duration::hours(12)));
    }
}
