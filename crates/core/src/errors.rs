use thiserror::Error;

use crate::domain::conversation::ControlState;
use crate::domain::message::DeliveryStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// Optimistic-concurrency conflict: the conversation's control state no
    /// longer matches what the caller read. Re-read and retry.
    #[error("conversation {conversation_id} is no longer {expected:?}-controlled")]
    StaleControlState { conversation_id: String, expected: ControlState },
    #[error("invalid delivery status transition from {from:?} to {to:?}")]
    InvalidDeliveryTransition { from: DeliveryStatus, to: DeliveryStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}
