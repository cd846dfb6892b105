//! Telephony provider boundary
//!
//! Everything that touches the SMS/voice provider lives here:
//! - **Webhooks** (`webhook`) - inbound payload parsing, normalization, and
//!   HMAC signature verification
//! - **Gateways** (`gateway`) - outbound SMS and push delivery behind traits,
//!   with no-op implementations for tests and offline development
//! - **Notifications** (`notify`) - operator alert dispatch honoring the
//!   per-operator category/channel preference matrix

pub mod gateway;
pub mod notify;
pub mod webhook;

pub use gateway::{
    GatewayError, HttpSmsGateway, NoopPushGateway, NoopSmsGateway, OutboundSms, PushGateway,
    SmsGateway,
};
pub use notify::{Notification, NotificationDispatcher, NotifyError, PreferenceSource};
pub use webhook::{
    verify_signature, InboundSmsWebhook, InboundVoiceWebhook, NormalizedInbound, StatusCallback,
    WebhookAck, WebhookError,
};
