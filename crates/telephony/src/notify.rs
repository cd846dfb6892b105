//! Operator notification dispatch. Every alert is filtered through the
//! operator's category/channel preference matrix before any gateway is
//! touched, and a failure on one channel never blocks the other.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use switchboard_core::domain::notification::{NotificationCategory, NotificationPreferences};

use crate::gateway::{GatewayError, OutboundSms, PushGateway, SmsGateway};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to load notification preferences for `{operator_id}`: {message}")]
    Preferences { operator_id: String, message: String },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Where the dispatcher reads an operator's preference matrix from. The
/// server adapts its preference repository to this.
#[async_trait]
pub trait PreferenceSource: Send + Sync {
    async fn preferences_for(
        &self,
        operator_id: &str,
    ) -> Result<NotificationPreferences, NotifyError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub category: NotificationCategory,
    pub body: String,
}

impl Notification {
    pub fn new(category: NotificationCategory, body: impl Into<String>) -> Self {
        Self { category, body: body.into() }
    }
}

pub struct NotificationDispatcher {
    preferences: Box<dyn PreferenceSource>,
    sms: Box<dyn SmsGateway>,
    push: Box<dyn PushGateway>,
    operator_id: String,
    operator_phone: Option<String>,
    sms_from: Option<String>,
}

impl NotificationDispatcher {
    pub fn new(
        preferences: Box<dyn PreferenceSource>,
        sms: Box<dyn SmsGateway>,
        push: Box<dyn PushGateway>,
        operator_id: impl Into<String>,
        operator_phone: Option<String>,
        sms_from: Option<String>,
    ) -> Self {
        Self {
            preferences,
            sms,
            push,
            operator_id: operator_id.into(),
            operator_phone,
            sms_from,
        }
    }

    /// Delivers on every channel the operator left enabled for the category.
    /// Gateway failures are logged and swallowed; a notification is advisory
    /// and must never fail the operation that raised it.
    pub async fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError> {
        let preferences = self.preferences.preferences_for(&self.operator_id).await?;
        let toggles = preferences.for_category(notification.category);

        if toggles.all_disabled() {
            debug!(
                event_name = "notify.suppressed",
                operator_id = %self.operator_id,
                category = notification.category.as_str(),
                "notification suppressed by operator preferences"
            );
            return Ok(());
        }

        if toggles.sms {
            self.deliver_sms(notification).await;
        }
        if toggles.push {
            if let Err(error) = self.push.send_push(&self.operator_id, &notification.body).await {
                warn!(
                    event_name = "notify.push_failed",
                    operator_id = %self.operator_id,
                    category = notification.category.as_str(),
                    error = %error,
                    "push notification failed"
                );
            }
        }

        info!(
            event_name = "notify.dispatched",
            operator_id = %self.operator_id,
            category = notification.category.as_str(),
            sms = toggles.sms,
            push = toggles.push,
            "operator notification dispatched"
        );
        Ok(())
    }

    async fn deliver_sms(&self, notification: &Notification) {
        let (Some(to), Some(from)) = (self.operator_phone.as_ref(), self.sms_from.as_ref()) else {
            debug!(
                event_name = "notify.sms_unconfigured",
                operator_id = %self.operator_id,
                "sms channel enabled but no operator phone or send line configured"
            );
            return;
        };
        let sms = OutboundSms {
            to: to.clone(),
            from: from.clone(),
            body: notification.body.clone(),
        };
        if let Err(error) = self.sms.send_sms(&sms).await {
            warn!(
                event_name = "notify.sms_failed",
                operator_id = %self.operator_id,
                category = notification.category.as_str(),
                error = %error,
                "sms notification failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use switchboard_core::domain::notification::{
        ChannelToggles, NotificationCategory, NotificationPreferences,
    };

    use super::{Notification, NotificationDispatcher, NotifyError, PreferenceSource};
    use crate::gateway::{GatewayError, NoopPushGateway, OutboundSms, PushGateway, SmsGateway};

    struct FixedPreferences(NotificationPreferences);

    #[async_trait]
    impl PreferenceSource for FixedPreferences {
        async fn preferences_for(
            &self,
            _operator_id: &str,
        ) -> Result<NotificationPreferences, NotifyError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSmsGateway {
        sent: Arc<Mutex<Vec<OutboundSms>>>,
    }

    #[async_trait]
    impl SmsGateway for RecordingSmsGateway {
        async fn send_sms(&self, sms: &OutboundSms) -> Result<String, GatewayError> {
            self.sent.lock().unwrap().push(sms.clone());
            Ok("SM-recorded".to_string())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingPushGateway {
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PushGateway for RecordingPushGateway {
        async fn send_push(&self, _operator_id: &str, body: &str) -> Result<(), GatewayError> {
            self.sent.lock().unwrap().push(body.to_string());
            Ok(())
        }
    }

    struct FailingSmsGateway;

    #[async_trait]
    impl SmsGateway for FailingSmsGateway {
        async fn send_sms(&self, _sms: &OutboundSms) -> Result<String, GatewayError> {
            Err(GatewayError::MissingCredentials)
        }
    }

    fn dispatcher_with(
        preferences: NotificationPreferences,
        sms: Box<dyn SmsGateway>,
        push: Box<dyn PushGateway>,
    ) -> NotificationDispatcher {
        NotificationDispatcher::new(
            Box::new(FixedPreferences(preferences)),
            sms,
            push,
            "op-1",
            Some("+15550009999".to_string()),
            Some("+15550002222".to_string()),
        )
    }

    #[tokio::test]
    async fn fully_disabled_category_is_silent() {
        let mut preferences = NotificationPreferences::all_enabled();
        preferences.set(NotificationCategory::Timeout, ChannelToggles { sms: false, push: false });

        let sms = RecordingSmsGateway::default();
        let push = RecordingPushGateway::default();
        let dispatcher =
            dispatcher_with(preferences, Box::new(sms.clone()), Box::new(push.clone()));
        dispatcher
            .dispatch(&Notification::new(NotificationCategory::Timeout, "conversation returned"))
            .await
            .expect("dispatch");
        assert!(sms.sent.lock().unwrap().is_empty());
        assert!(push.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sms_failure_does_not_block_push() {
        let push = RecordingPushGateway::default();
        let dispatcher = dispatcher_with(
            NotificationPreferences::all_enabled(),
            Box::new(FailingSmsGateway),
            Box::new(push.clone()),
        );
        dispatcher
            .dispatch(&Notification::new(NotificationCategory::Handoff, "customer needs a human"))
            .await
            .expect("dispatch");
        assert_eq!(push.sent.lock().unwrap().len(), 1, "push still delivered");
    }

    #[tokio::test]
    async fn enabled_channels_both_receive_the_body() {
        let sms = RecordingSmsGateway::default();
        let push = RecordingPushGateway::default();
        let dispatcher = dispatcher_with(
            NotificationPreferences::all_enabled(),
            Box::new(sms.clone()),
            Box::new(push.clone()),
        );
        dispatcher
            .dispatch(&Notification::new(NotificationCategory::Voicemail, "new voicemail"))
            .await
            .expect("dispatch");

        assert_eq!(sms.sent.lock().unwrap().len(), 1);
        assert_eq!(sms.sent.lock().unwrap()[0].to, "+15550009999");
        assert_eq!(push.sent.lock().unwrap().as_slice(), ["new voicemail"]);
    }

    #[tokio::test]
    async fn missing_operator_phone_skips_sms_quietly() {
        let dispatcher = NotificationDispatcher::new(
            Box::new(FixedPreferences(NotificationPreferences::all_enabled())),
            Box::new(FailingSmsGateway),
            Box::new(NoopPushGateway::new()),
            "op-1",
            None,
            None,
        );
        dispatcher
            .dispatch(&Notification::new(NotificationCategory::SystemError, "send failed"))
            .await
            .expect("dispatch stays ok without a phone on file");
    }
}
