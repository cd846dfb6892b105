//! In-process event fan-out. Each conversation gets its own broadcast
//! channel; delivery is at-most-once and a slow or absent subscriber never
//! blocks the publisher.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::debug;

use switchboard_core::domain::conversation::ConversationId;
use switchboard_core::events::ConversationEvent;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
pub struct RealtimeHub {
    channels: Mutex<HashMap<ConversationId, broadcast::Sender<ConversationEvent>>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, conversation_id: &ConversationId) -> broadcast::Receiver<ConversationEvent> {
        let mut channels = self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(conversation_id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publishes to whoever is currently subscribed. Events for conversations
    /// nobody watches are dropped, not queued, and a channel whose last
    /// receiver is gone is evicted so the map does not grow with every
    /// conversation ever viewed.
    pub fn publish(&self, event: ConversationEvent) {
        let conversation_id = event.conversation_id().clone();
        let mut channels = self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(sender) = channels.get(&conversation_id) else {
            return;
        };
        if sender.send(event).is_err() {
            channels.remove(&conversation_id);
            debug!(
                event_name = "realtime.channel_evicted",
                conversation_id = %conversation_id.0,
                "conversation event dropped and idle channel evicted"
            );
        }
    }
}
