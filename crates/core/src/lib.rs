pub mod config;
pub mod control;
pub mod domain;
pub mod errors;
pub mod events;
pub mod lines;
pub mod receipts;
pub mod session;

pub use control::HandoffPolicy;
pub use domain::conversation::{AgentId, ControlState, Conversation, ConversationId};
pub use domain::handoff::{HandoffEvent, HandoffEventId, HandoffReason};
pub use domain::line::{LineId, PhoneLine};
pub use domain::message::{Channel, DeliveryStatus, Message, MessageId, Sender};
pub use domain::notification::{
    ChannelToggles, NotificationCategory, NotificationChannel, NotificationPreferences,
};
pub use errors::DomainError;
pub use events::ConversationEvent;
pub use lines::{LineConfig, LineRegistry, LineRegistryError};
pub use receipts::{BatcherAction, BatcherState, ReceiptBatcher};
pub use session::{LineFilter, SessionView};
