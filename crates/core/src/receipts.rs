//! Client-side read-receipt batching.
//!
//! Visibility signals for rendered messages arrive one at a time; issuing a
//! mark-read request per signal would flood the server under fast scrolling.
//! The batcher is an explicit two-state machine — idle, or collecting with a
//! deadline — whose transitions are pure functions of `(event, state)`, so the
//! debounce behavior is testable without timers.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};

use crate::domain::message::{DeliveryStatus, Message, MessageId, Sender};

pub const DEFAULT_DEBOUNCE_MS: i64 = 500;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatcherState {
    Idle,
    Collecting { pending: BTreeSet<MessageId>, deadline: DateTime<Utc> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatcherAction {
    /// Nothing to do.
    None,
    /// A collection window just opened; the host should arm a single timer
    /// that calls `tick` at this deadline.
    ScheduleFlush(DateTime<Utc>),
    /// The window closed; issue one batched mark-read request for these ids.
    Flush(Vec<MessageId>),
}

#[derive(Clone, Debug)]
pub struct ReceiptBatcher {
    debounce: Duration,
    state: BatcherState,
}

impl Default for ReceiptBatcher {
    fn default() -> Self {
        Self::new(Duration::milliseconds(DEFAULT_DEBOUNCE_MS))
    }
}

impl ReceiptBatcher {
    pub fn new(debounce: Duration) -> Self {
        Self { debounce, state: BatcherState::Idle }
    }

    pub fn state(&self) -> &BatcherState {
        &self.state
    }

    /// A message became visible. The first observation opens the window;
    /// later ones accumulate without extending the deadline.
    pub fn observe(&mut self, id: MessageId, now: DateTime<Utc>) -> BatcherAction {
        match &mut self.state {
            BatcherState::Idle => {
                let deadline = now + self.debounce;
                let mut pending = BTreeSet::new();
                pending.insert(id);
                self.state = BatcherState::Collecting { pending, deadline };
                BatcherAction::ScheduleFlush(deadline)
            }
            BatcherState::Collecting { pending, .. } => {
                pending.insert(id);
                BatcherAction::None
            }
        }
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> BatcherAction {
        match &self.state {
            BatcherState::Collecting { pending, deadline } if now >= *deadline => {
                let batch: Vec<MessageId> = pending.iter().cloned().collect();
                self.state = BatcherState::Idle;
                BatcherAction::Flush(batch)
            }
            _ => BatcherAction::None,
        }
    }
}

/// Messages the viewer authored, or that are already read, are excluded from
/// visibility observation.
pub fn should_observe(message: &Message, viewer: Sender) -> bool {
    message.sender != viewer && message.delivery_status != DeliveryStatus::Read
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{should_observe, BatcherAction, BatcherState, ReceiptBatcher};
    use crate::domain::conversation::ConversationId;
    use crate::domain::message::{Channel, DeliveryStatus, Message, MessageId, Sender};

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn first_observation_opens_a_window_and_schedules_one_flush() {
        let mut batcher = ReceiptBatcher::new(Duration::milliseconds(500));

        let first = batcher.observe(MessageId("101".to_string()), at(0));
        assert_eq!(first, BatcherAction::ScheduleFlush(at(0) + Duration::milliseconds(500)));

        let second = batcher.observe(MessageId("102".to_string()), at(0));
        assert_eq!(second, BatcherAction::None);
    }

    #[test]
    fn tick_flushes_the_accumulated_batch_once() {
        let mut batcher = ReceiptBatcher::new(Duration::milliseconds(500));
        batcher.observe(MessageId("102".to_string()), at(0));
        batcher.observe(MessageId("101".to_string()), at(0));
        batcher.observe(MessageId("101".to_string()), at(0));

        assert_eq!(batcher.tick(at(0)), BatcherAction::None, "deadline not reached");

        let flush = batcher.tick(at(1));
        assert_eq!(
            flush,
            BatcherAction::Flush(vec![MessageId("101".to_string()), MessageId("102".to_string())])
        );
        assert_eq!(*batcher.state(), BatcherState::Idle);
        assert_eq!(batcher.tick(at(2)), BatcherAction::None, "second tick is a no-op");
    }

    #[test]
    fn observations_after_a_flush_open_a_fresh_window() {
        let mut batcher = ReceiptBatcher::new(Duration::milliseconds(500));
        batcher.observe(MessageId("101".to_string()), at(0));
        batcher.tick(at(1));

        let action = batcher.observe(MessageId("103".to_string()), at(2));
        assert_eq!(action, BatcherAction::ScheduleFlush(at(2) + Duration::milliseconds(500)));
    }

    #[test]
    fn own_and_already_read_messages_are_not_observed() {
        let inbound = Message::inbound(
            ConversationId("c-1".to_string()),
            Channel::Sms,
            Some("hi".to_string()),
            None,
            None,
            "SM1",
            at(0),
        );
        assert!(should_observe(&inbound, Sender::Agent));
        assert!(!should_observe(&inbound, Sender::Customer), "own message");

        let mut read = inbound;
        read.advance_delivery(DeliveryStatus::Read, at(1)).expect("read");
        assert!(!should_observe(&read, Sender::Agent), "already read");
    }
}
