//! Outbound delivery gateways. The HTTP implementations talk to the real
//! provider; the no-op implementations satisfy the same traits for tests and
//! for running without credentials.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider rejected send: status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("telephony credentials are not configured")]
    MissingCredentials,
}

#[derive(Clone, Debug, Serialize)]
pub struct OutboundSms {
    pub to: String,
    pub from: String,
    pub body: String,
}

/// Hands an SMS to the provider and returns the provider-assigned message id.
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send_sms(&self, sms: &OutboundSms) -> Result<String, GatewayError>;
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send_push(&self, operator_id: &str, body: &str) -> Result<(), GatewayError>;
}

pub struct HttpSmsGateway {
    client: reqwest::Client,
    base_url: String,
    account_id: String,
    auth_token: SecretString,
}

#[derive(Deserialize)]
struct SendResponse {
    sid: String,
}

impl HttpSmsGateway {
    pub fn new(
        base_url: impl Into<String>,
        account_id: impl Into<String>,
        auth_token: SecretString,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            account_id: account_id.into(),
            auth_token,
        }
    }
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn send_sms(&self, sms: &OutboundSms) -> Result<String, GatewayError> {
        let url = format!(
            "{}/accounts/{}/messages",
            self.base_url.trim_end_matches('/'),
            self.account_id
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.auth_token.expose_secret())
            .json(sms)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                event_name = "telephony.sms.rejected",
                status = status.as_u16(),
                to = %sms.to,
                "provider rejected outbound sms"
            );
            return Err(GatewayError::Rejected { status: status.as_u16(), body });
        }

        let accepted: SendResponse = response.json().await?;
        debug!(
            event_name = "telephony.sms.accepted",
            provider_message_id = %accepted.sid,
            to = %sms.to,
            "provider accepted outbound sms"
        );
        Ok(accepted.sid)
    }
}

/// Accepts every send and fabricates sequential provider ids.
#[derive(Default)]
pub struct NoopSmsGateway {
    counter: AtomicU64,
}

impl NoopSmsGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SmsGateway for NoopSmsGateway {
    async fn send_sms(&self, sms: &OutboundSms) -> Result<String, GatewayError> {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            event_name = "telephony.sms.noop",
            to = %sms.to,
            "dropping outbound sms (no-op gateway)"
        );
        Ok(format!("noop-{sequence}"))
    }
}

#[derive(Default)]
pub struct NoopPushGateway;

impl NoopPushGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PushGateway for NoopPushGateway {
    async fn send_push(&self, operator_id: &str, _body: &str) -> Result<(), GatewayError> {
        debug!(
            event_name = "telephony.push.noop",
            operator_id = %operator_id,
            "dropping push notification (no-op gateway)"
        );
        Ok(())
    }
}
