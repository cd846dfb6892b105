//! Read-receipt sync. Mark-read is idempotent at the repository level; the
//! broadcast carries only the ids that actually changed, so overlapping
//! batches from debounced clients never re-announce a read message.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use switchboard_core::domain::conversation::ConversationId;
use switchboard_core::domain::message::{Message, MessageId, Sender};
use switchboard_core::events::ConversationEvent;
use switchboard_core::receipts::{should_observe, BatcherAction, ReceiptBatcher};
use switchboard_db::repositories::{
    ConversationRepository, MessageRepository, RepositoryError,
};

use crate::realtime::RealtimeHub;

pub struct ReceiptService {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    hub: Arc<RealtimeHub>,
}

impl ReceiptService {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        hub: Arc<RealtimeHub>,
    ) -> Self {
        Self { conversations, messages, hub }
    }

    /// Marks a batch read on behalf of `reader`. Returns the newly-read ids;
    /// already-read and reader-authored ids contribute nothing, and a batch
    /// that changes nothing emits no event.
    pub async fn mark_read(
        &self,
        conversation_id: &ConversationId,
        message_ids: &[MessageId],
        reader: Sender,
        now: DateTime<Utc>,
    ) -> Result<Vec<MessageId>, RepositoryError> {
        let updated = self.messages.mark_read(conversation_id, message_ids, reader, now).await?;
        if updated.is_empty() {
            return Ok(updated);
        }

        self.conversations.decrement_unread(conversation_id, updated.len() as i64).await?;
        self.hub.publish(ConversationEvent::MessagesRead {
            conversation_id: conversation_id.clone(),
            message_ids: updated.clone(),
            reader,
            read_at: now,
        });
        info!(
            event_name = "receipts.marked_read",
            conversation_id = %conversation_id.0,
            count = updated.len(),
            reader = reader.as_str(),
            "messages marked read"
        );
        Ok(updated)
    }
}

/// Server-side host for one viewer's debounce window on one conversation.
/// `observe` feeds visibility signals in; the caller arms a timer for the
/// returned deadline and calls `flush_due` when it fires.
pub struct ReadSync {
    conversation_id: ConversationId,
    reader: Sender,
    batcher: ReceiptBatcher,
}

impl ReadSync {
    pub fn new(conversation_id: ConversationId, reader: Sender) -> Self {
        Self { conversation_id, reader, batcher: ReceiptBatcher::default() }
    }

    pub fn observe(&mut self, message: &Message, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !should_observe(message, self.reader) {
            return None;
        }
        match self.batcher.observe(message.id.clone(), now) {
            BatcherAction::ScheduleFlush(deadline) => Some(deadline),
            _ => None,
        }
    }

    pub async fn flush_due(
        &mut self,
        service: &ReceiptService,
        now: DateTime<Utc>,
    ) -> Result<Vec<MessageId>, RepositoryError> {
        match self.batcher.tick(now) {
            BatcherAction::Flush(batch) => {
                service.mark_read(&self.conversation_id, &batch, self.reader, now).await
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use switchboard_core::domain::message::{Channel, Message, Sender};
    use switchboard_core::events::ConversationEvent;
    use switchboard_db::repositories::{
        ConversationRepository, InMemoryConversationRepository, InMemoryMessageRepository,
        MessageRepository,
    };

    use super::{ReadSync, ReceiptService};
    use crate::realtime::RealtimeHub;

    struct Fixture {
        conversations: Arc<InMemoryConversationRepository>,
        messages: Arc<InMemoryMessageRepository>,
        hub: Arc<RealtimeHub>,
        service: ReceiptService,
    }

    fn fixture() -> Fixture {
        let conversations = Arc::new(InMemoryConversationRepository::new());
        let messages = Arc::new(InMemoryMessageRepository::new());
        let hub = Arc::new(RealtimeHub::new());
        let service = ReceiptService::new(conversations.clone(), messages.clone(), hub.clone());
        Fixture { conversations, messages, hub, service }
    }

    async fn inbound(fixture: &Fixture, conversation: &switchboard_core::domain::conversation::Conversation, sid: &str) -> Message {
        let message = Message::inbound(
            conversation.id.clone(),
            Channel::Sms,
            Some("hi".to_string()),
            None,
            None,
            sid,
            Utc::now(),
        );
        fixture.messages.insert(&message).await.expect("insert");
        fixture.conversations.record_customer_activity(&conversation.id, Utc::now()).await.expect("activity");
        message
    }

    #[tokio::test]
    async fn overlapping_batches_only_announce_newly_read_ids() {
        let fixture = fixture();
        let conversation = fixture
            .conversations
            .find_or_create("default", "+15550009999", None, Utc::now())
            .await
            .expect("create");
        let a = inbound(&fixture, &conversation, "SM-a").await;
        let b = inbound(&fixture, &conversation, "SM-b").await;
        let c = inbound(&fixture, &conversation, "SM-c").await;

        let mut events = fixture.hub.subscribe(&conversation.id);
        let now = Utc::now();

        let first = fixture
            .service
            .mark_read(&conversation.id, &[a.id.clone(), b.id.clone()], Sender::Agent, now)
            .await
            .expect("first batch");
        assert_eq!(first.len(), 2);

        let second = fixture
            .service
            .mark_read(&conversation.id, &[b.id.clone(), c.id.clone()], Sender::Agent, now)
            .await
            .expect("second batch");
        assert_eq!(second, vec![c.id.clone()], "only the id that actually changed");

        match events.try_recv().expect("first event") {
            ConversationEvent::MessagesRead { message_ids, .. } => {
                assert_eq!(message_ids.len(), 2)
            }
            other => panic!("unexpected event {other:?}"),
        }
        match events.try_recv().expect("second event") {
            ConversationEvent::MessagesRead { message_ids, .. } => {
                assert_eq!(message_ids, vec![c.id.clone()])
            }
            other => panic!("unexpected event {other:?}"),
        }

        let stored =
            fixture.conversations.find_by_id(&conversation.id).await.expect("find").expect("exists");
        assert_eq!(stored.unread_count, 0);
    }

    #[tokio::test]
    async fn an_all_duplicate_batch_emits_no_event() {
        let fixture = fixture();
        let conversation = fixture
            .conversations
            .find_or_create("default", "+15550009999", None, Utc::now())
            .await
            .expect("create");
        let message = inbound(&fixture, &conversation, "SM-a").await;

        let now = Utc::now();
        fixture
            .service
            .mark_read(&conversation.id, &[message.id.clone()], Sender::Agent, now)
            .await
            .expect("first");

        let mut events = fixture.hub.subscribe(&conversation.id);
        let again = fixture
            .service
            .mark_read(&conversation.id, &[message.id.clone()], Sender::Agent, now)
            .await
            .expect("repeat");
        assert!(again.is_empty());
        assert!(events.try_recv().is_err(), "no broadcast for a no-op batch");

        let stored =
            fixture.conversations.find_by_id(&conversation.id).await.expect("find").expect("exists");
        assert_eq!(stored.unread_count, 0, "unread stays floored");
    }

    #[tokio::test]
    async fn read_sync_debounces_visibility_into_one_batch() {
        let fixture = fixture();
        let conversation = fixture
            .conversations
            .find_or_create("default", "+15550009999", None, Utc::now())
            .await
            .expect("create");
        let a = inbound(&fixture, &conversation, "SM-a").await;
        let b = inbound(&fixture, &conversation, "SM-b").await;
        let own = Message::outbound(conversation.id.clone(), Sender::Agent, "reply", None, Utc::now());
        fixture.messages.insert(&own).await.expect("insert own");

        let mut sync = ReadSync::new(conversation.id.clone(), Sender::Agent);
        let now = Utc::now();

        let deadline = sync.observe(&a, now).expect("first observation schedules a flush");
        assert!(sync.observe(&b, now).is_none(), "window already open");
        assert!(sync.observe(&own, now).is_none(), "own message is never observed");

        assert!(sync.flush_due(&fixture.service, now).await.expect("early tick").is_empty());
        let flushed = sync
            .flush_due(&fixture.service, deadline + Duration::milliseconds(1))
            .await
            .expect("flush");
        assert_eq!(flushed.len(), 2);

        let stored =
            fixture.conversations.find_by_id(&conversation.id).await.expect("find").expect("exists");
        assert_eq!(stored.unread_count, 0);
    }
}
