//! Inbound webhook payloads from the telephony provider: SMS, voice calls,
//! and outbound delivery-status callbacks. Parsing normalizes phone numbers
//! up front so the rest of the system only ever sees E.164.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use switchboard_core::domain::message::{Channel, DeliveryStatus};
use switchboard_core::lines::{normalize_number, LineRegistryError};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid phone number in webhook: {0}")]
    InvalidNumber(#[from] LineRegistryError),
    #[error("unknown delivery status `{0}`")]
    UnknownStatus(String),
    #[error("webhook signature rejected")]
    BadSignature,
}

/// Provider payload for an inbound SMS/MMS.
#[derive(Clone, Debug, Deserialize)]
pub struct InboundSmsWebhook {
    pub message_sid: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
}

/// Provider payload for a completed inbound call. A recording URL marks the
/// call as a voicemail.
#[derive(Clone, Debug, Deserialize)]
pub struct InboundVoiceWebhook {
    pub call_sid: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub recording_url: Option<String>,
    #[serde(default)]
    pub transcription_text: Option<String>,
}

impl InboundVoiceWebhook {
    pub fn is_voicemail(&self) -> bool {
        self.recording_url.is_some()
    }
}

/// Delivery-status callback for a previously sent outbound message.
#[derive(Clone, Debug, Deserialize)]
pub struct StatusCallback {
    pub message_sid: String,
    pub message_status: String,
}

impl StatusCallback {
    pub fn delivery_status(&self) -> Result<DeliveryStatus, WebhookError> {
        match self.message_status.as_str() {
            "sent" | "queued" | "accepted" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "read" => Ok(DeliveryStatus::Read),
            "failed" | "undelivered" => Ok(DeliveryStatus::Failed),
            other => Err(WebhookError::UnknownStatus(other.to_string())),
        }
    }
}

/// Provider-independent view of an inbound contact, numbers normalized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedInbound {
    pub provider_message_id: String,
    pub channel: Channel,
    pub from: String,
    pub to: String,
    pub body: Option<String>,
    pub media_url: Option<String>,
}

impl NormalizedInbound {
    pub fn from_sms(webhook: &InboundSmsWebhook) -> Result<Self, WebhookError> {
        Ok(Self {
            provider_message_id: webhook.message_sid.clone(),
            channel: Channel::Sms,
            from: normalize_number(&webhook.from)?,
            to: normalize_number(&webhook.to)?,
            body: webhook.body.clone().filter(|body| !body.is_empty()),
            media_url: webhook.media_url.clone(),
        })
    }

    pub fn from_voice(webhook: &InboundVoiceWebhook) -> Result<Self, WebhookError> {
        Ok(Self {
            provider_message_id: webhook.call_sid.clone(),
            channel: Channel::Voice,
            from: normalize_number(&webhook.from)?,
            to: normalize_number(&webhook.to)?,
            body: webhook.transcription_text.clone().filter(|text| !text.is_empty()),
            media_url: webhook.recording_url.clone(),
        })
    }
}

/// Body returned to the provider. Webhooks are acknowledged even when the
/// payload is ignored, so the provider stops retrying.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WebhookAck {
    pub fn ok() -> Self {
        Self { status: "ok", reason: None }
    }

    pub fn ignored(reason: impl Into<String>) -> Self {
        Self { status: "ignored", reason: Some(reason.into()) }
    }
}

/// Verifies the provider's hex-encoded HMAC-SHA256 signature over the raw
/// request body. Comparison happens inside the Mac to stay constant-time.
pub fn verify_signature(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Some(signature) = decode_hex(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

pub fn sign_payload(secret: &str, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    let digest = mac.finalize().into_bytes();
    let mut rendered = String::with_capacity(digest.len() * 2);
    for byte in digest {
        rendered.push(hex_digit(byte >> 4));
        rendered.push(hex_digit(byte & 0x0f));
    }
    Some(rendered)
}

fn hex_digit(nibble: u8) -> char {
    match nibble {
        0..=9 => (b'0' + nibble) as char,
        _ => (b'a' + nibble - 10) as char,
    }
}

fn hex_nibble(value: u8) -> Option<u8> {
    match value {
        b'0'..=b'9' => Some(value - b'0'),
        b'a'..=b'f' => Some(value - b'a' + 10),
        b'A'..=b'F' => Some(value - b'A' + 10),
        _ => None,
    }
}

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    let bytes = raw.as_bytes();
    if bytes.len() % 2 != 0 {
        return None;
    }
    let mut decoded = Vec::with_capacity(bytes.len() / 2);
    for pair in bytes.chunks_exact(2) {
        let high = hex_nibble(pair[0])?;
        let low = hex_nibble(pair[1])?;
        decoded.push((high << 4) | low);
    }
    Some(decoded)
}

#[cfg(test)]
mod tests {
    use switchboard_core::domain::message::{Channel, DeliveryStatus};

    use super::{
        sign_payload, verify_signature, InboundSmsWebhook, InboundVoiceWebhook, NormalizedInbound,
        StatusCallback,
    };

    #[test]
    fn sms_webhook_numbers_are_normalized() {
        let webhook = InboundSmsWebhook {
            message_sid: "SM123".to_string(),
            from: "(555) 000-1111".to_string(),
            to: "+15550002222".to_string(),
            body: Some("send a human".to_string()),
            media_url: None,
        };
        let inbound = NormalizedInbound::from_sms(&webhook).expect("normalize");
        assert_eq!(inbound.from, "+15550001111");
        assert_eq!(inbound.to, "+15550002222");
        assert_eq!(inbound.channel, Channel::Sms);
        assert_eq!(inbound.provider_message_id, "SM123");
    }

    #[test]
    fn voice_webhook_with_recording_is_a_voicemail() {
        let webhook = InboundVoiceWebhook {
            call_sid: "CA9".to_string(),
            from: "+15550001111".to_string(),
            to: "+15550002222".to_string(),
            recording_url: Some("https://recordings.example/CA9".to_string()),
            transcription_text: Some("call me back".to_string()),
        };
        assert!(webhook.is_voicemail());

        let inbound = NormalizedInbound::from_voice(&webhook).expect("normalize");
        assert_eq!(inbound.channel, Channel::Voice);
        assert_eq!(inbound.body.as_deref(), Some("call me back"));
        assert_eq!(inbound.media_url.as_deref(), Some("https://recordings.example/CA9"));
    }

    #[test]
    fn status_callback_maps_provider_vocabulary() {
        let delivered = StatusCallback {
            message_sid: "SM1".to_string(),
            message_status: "delivered".to_string(),
        };
        assert_eq!(delivered.delivery_status().expect("parse"), DeliveryStatus::Delivered);

        let undelivered = StatusCallback {
            message_sid: "SM1".to_string(),
            message_status: "undelivered".to_string(),
        };
        assert_eq!(undelivered.delivery_status().expect("parse"), DeliveryStatus::Failed);

        let unknown = StatusCallback {
            message_sid: "SM1".to_string(),
            message_status: "teleported".to_string(),
        };
        assert!(unknown.delivery_status().is_err());
    }

    #[test]
    fn signature_round_trip_and_tamper_detection() {
        let payload = br#"{"message_sid":"SM1"}"#;
        let signature = sign_payload("shh", payload).expect("sign");

        assert!(verify_signature("shh", payload, &signature));
        assert!(!verify_signature("shh", b"tampered", &signature));
        assert!(!verify_signature("wrong", payload, &signature));
        assert!(!verify_signature("shh", payload, "not-hex"));
    }
}
