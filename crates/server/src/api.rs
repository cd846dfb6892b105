//! HTTP surface: provider webhooks and the operator-facing conversation API.
//!
//! Webhooks are acknowledged with 200 even when the payload is ignored, so
//! the provider stops retrying; the one exception is a destination number
//! with no configured line, which is a 404 so misrouted traffic shows up in
//! provider logs. Control transitions that lose a race return 409.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use switchboard_core::domain::conversation::{AgentId, ConversationId};
use switchboard_core::domain::handoff::{HandoffEvent, HandoffReason};
use switchboard_core::domain::line::LineId;
use switchboard_core::domain::message::{Message, MessageId, Sender};
use switchboard_core::domain::notification::NotificationPreferences;
use switchboard_core::session::SessionView;
use switchboard_db::repositories::{MessageRepository, NotificationPreferenceRepository};
use switchboard_telephony::webhook::{
    verify_signature, InboundSmsWebhook, InboundVoiceWebhook, StatusCallback, WebhookAck,
};

use crate::bootstrap::Application;
use crate::control::{ControlError, ControlService};
use crate::ingest::{IngestError, IngestService};
use crate::outbound::{SendError, SendService};
use crate::receipts::ReceiptService;

pub const SIGNATURE_HEADER: &str = "x-switchboard-signature";

#[derive(Clone)]
pub struct ApiState {
    ingest: Arc<IngestService>,
    control: Arc<ControlService>,
    receipts: Arc<ReceiptService>,
    sender: Arc<SendService>,
    messages: Arc<dyn MessageRepository>,
    preferences: Arc<dyn NotificationPreferenceRepository>,
    default_agent: AgentId,
    webhook_secret: Option<String>,
}

pub fn router(app: &Application) -> Router {
    router_with_state(ApiState {
        ingest: app.ingest.clone(),
        control: app.control.clone(),
        receipts: app.receipts.clone(),
        sender: app.sender.clone(),
        messages: Arc::new(switchboard_db::repositories::SqlMessageRepository::new(
            app.db_pool.clone(),
        )),
        preferences: app.preferences.clone(),
        default_agent: AgentId(app.config.handoff.default_agent_id.clone()),
        webhook_secret: app.config.telephony.webhook_secret.clone(),
    })
}

fn router_with_state(state: ApiState) -> Router {
    Router::new()
        .route("/webhooks/sms", post(sms_webhook))
        .route("/webhooks/voice", post(voice_webhook))
        .route("/webhooks/status", post(status_webhook))
        .route("/conversations/{id}/messages", post(send_message).get(list_messages))
        .route("/conversations/{id}/messages/read", post(mark_read))
        .route("/conversations/{id}/handoff", post(request_handoff))
        .route("/conversations/{id}/handback", post(handback))
        .route(
            "/notification-preferences/{operator_id}",
            get(get_preferences).put(put_preferences),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

type Rejection = (StatusCode, Json<ApiError>);

fn reject(status: StatusCode, message: impl Into<String>) -> Rejection {
    (status, Json(ApiError { error: message.into() }))
}

fn internal(error: impl std::fmt::Display) -> Rejection {
    reject(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

fn check_signature(state: &ApiState, headers: &HeaderMap, body: &[u8]) -> Result<(), Rejection> {
    let Some(secret) = state.webhook_secret.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "missing webhook signature"))?;
    if !verify_signature(secret, body, provided) {
        return Err(reject(StatusCode::UNAUTHORIZED, "webhook signature rejected"));
    }
    Ok(())
}

/// Webhook payloads that will never parse get acknowledged, not rejected;
/// a non-2xx would only make the provider replay the same garbage.
fn acknowledge_malformed(error: serde_json::Error) -> (StatusCode, Json<WebhookAck>) {
    warn!(
        event_name = "api.webhook_malformed",
        error = %error,
        "unparseable webhook payload acknowledged"
    );
    (StatusCode::OK, Json(WebhookAck::ignored(format!("malformed payload: {error}"))))
}

async fn sms_webhook(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookAck>), Rejection> {
    check_signature(&state, &headers, &body)?;
    let webhook: InboundSmsWebhook = match serde_json::from_slice(&body) {
        Ok(webhook) => webhook,
        Err(error) => return Ok(acknowledge_malformed(error)),
    };
    match state.ingest.ingest_sms(&webhook, Utc::now()).await {
        Ok(_) => Ok((StatusCode::OK, Json(WebhookAck::ok()))),
        Err(error) => ingest_rejection(error),
    }
}

async fn voice_webhook(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookAck>), Rejection> {
    check_signature(&state, &headers, &body)?;
    let webhook: InboundVoiceWebhook = match serde_json::from_slice(&body) {
        Ok(webhook) => webhook,
        Err(error) => return Ok(acknowledge_malformed(error)),
    };
    match state.ingest.ingest_voice(&webhook, Utc::now()).await {
        Ok(_) => Ok((StatusCode::OK, Json(WebhookAck::ok()))),
        Err(error) => ingest_rejection(error),
    }
}

async fn status_webhook(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookAck>), Rejection> {
    check_signature(&state, &headers, &body)?;
    let callback: StatusCallback = match serde_json::from_slice(&body) {
        Ok(callback) => callback,
        Err(error) => return Ok(acknowledge_malformed(error)),
    };
    match state.ingest.apply_status(&callback, Utc::now()).await {
        Ok(true) => Ok((StatusCode::OK, Json(WebhookAck::ok()))),
        Ok(false) => Ok((StatusCode::OK, Json(WebhookAck::ignored("status not applicable")))),
        Err(error) => ingest_rejection(error),
    }
}

/// Everything the ingest path can fail with gets a 200 ack so the provider
/// stops retrying, except a destination number with no configured line —
/// that is a routing mistake worth surfacing in the provider's logs as 404.
fn ingest_rejection(error: IngestError) -> Result<(StatusCode, Json<WebhookAck>), Rejection> {
    match error {
        IngestError::UnknownLine(number) => {
            warn!(
                event_name = "api.unknown_line",
                number = %number,
                "webhook for an unconfigured number"
            );
            Err(reject(StatusCode::NOT_FOUND, format!("no configured line matches `{number}`")))
        }
        IngestError::ReceiveDisabled(line) => {
            Ok((StatusCode::OK, Json(WebhookAck::ignored(format!("line `{line}` is send-only")))))
        }
        IngestError::Webhook(error) => {
            Ok((StatusCode::OK, Json(WebhookAck::ignored(error.to_string()))))
        }
        other => {
            warn!(
                event_name = "api.webhook_failed",
                error = %other,
                "webhook processing failed, acknowledged to stop provider retries"
            );
            Ok((StatusCode::OK, Json(WebhookAck::ignored("processing failed, logged"))))
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    body: String,
    #[serde(default = "default_sender")]
    sender: Sender,
    #[serde(default)]
    line_id: Option<String>,
}

fn default_sender() -> Sender {
    Sender::Agent
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: Message,
}

async fn send_message(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<MessageResponse>, Rejection> {
    let mut session = SessionView::default();
    if let Some(line_id) = request.line_id {
        session.set_active_send_line(LineId(line_id));
    }
    let message = state
        .sender
        .send(&ConversationId(id), request.sender, &request.body, &session, Utc::now())
        .await
        .map_err(|error| match error {
            SendError::ConversationNotFound(id) => {
                reject(StatusCode::NOT_FOUND, format!("conversation `{id}` not found"))
            }
            SendError::EmptyBody => reject(StatusCode::BAD_REQUEST, "message body is empty"),
            SendError::NoSendLine(error) => reject(StatusCode::CONFLICT, error.to_string()),
            gateway @ SendError::Gateway(_) => reject(StatusCode::BAD_GATEWAY, gateway.to_string()),
            SendError::Repository(error) => internal(error),
        })?;
    Ok(Json(MessageResponse { message }))
}

#[derive(Debug, Serialize)]
struct TranscriptResponse {
    messages: Vec<Message>,
}

async fn list_messages(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<TranscriptResponse>, Rejection> {
    let messages =
        state.messages.list_for_conversation(&ConversationId(id)).await.map_err(internal)?;
    Ok(Json(TranscriptResponse { messages }))
}

#[derive(Debug, Deserialize)]
struct MarkReadRequest {
    message_ids: Vec<String>,
    #[serde(default = "default_sender")]
    reader_role: Sender,
}

#[derive(Debug, Serialize)]
struct MarkReadResponse {
    updated_ids: Vec<MessageId>,
}

async fn mark_read(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    Json(request): Json<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>, Rejection> {
    let ids: Vec<MessageId> = request.message_ids.into_iter().map(MessageId).collect();
    let updated_ids = state
        .receipts
        .mark_read(&ConversationId(id), &ids, request.reader_role, Utc::now())
        .await
        .map_err(internal)?;
    Ok(Json(MarkReadResponse { updated_ids }))
}

#[derive(Debug, Deserialize)]
struct HandoffRequest {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    agent_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ControlResponse {
    event: HandoffEvent,
}

async fn request_handoff(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    Json(request): Json<HandoffRequest>,
) -> Result<Json<ControlResponse>, Rejection> {
    let reason = match request.reason.as_deref() {
        None => HandoffReason::Manual,
        Some(raw) => HandoffReason::parse(raw)
            .ok_or_else(|| reject(StatusCode::BAD_REQUEST, format!("unknown reason `{raw}`")))?,
    };
    let agent = request.agent_id.map(AgentId).unwrap_or_else(|| state.default_agent.clone());
    let event = state
        .control
        .request_handoff(&ConversationId(id), agent, reason, Utc::now())
        .await
        .map_err(control_rejection)?;
    Ok(Json(ControlResponse { event }))
}

#[derive(Debug, Deserialize)]
struct HandbackRequest {
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    context_summary: Option<String>,
    #[serde(default)]
    notify_customer: bool,
}

async fn handback(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    Json(request): Json<HandbackRequest>,
) -> Result<Json<ControlResponse>, Rejection> {
    let event = state
        .control
        .handback(
            &ConversationId(id),
            request.agent_id.map(AgentId),
            HandoffReason::Manual,
            request.context_summary,
            request.notify_customer,
            Utc::now(),
        )
        .await
        .map_err(control_rejection)?;
    Ok(Json(ControlResponse { event }))
}

fn control_rejection(error: ControlError) -> Rejection {
    match error {
        ControlError::ConversationNotFound(id) => {
            reject(StatusCode::NOT_FOUND, format!("conversation `{id}` not found"))
        }
        stale @ ControlError::Stale { .. } => reject(StatusCode::CONFLICT, stale.to_string()),
        ControlError::Repository(error) => internal(error),
    }
}

async fn get_preferences(
    Path(operator_id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<NotificationPreferences>, Rejection> {
    let preferences = state.preferences.load(&operator_id).await.map_err(internal)?;
    Ok(Json(preferences))
}

async fn put_preferences(
    Path(operator_id): Path<String>,
    State(state): State<ApiState>,
    Json(preferences): Json<NotificationPreferences>,
) -> Result<Json<NotificationPreferences>, Rejection> {
    state.preferences.store(&operator_id, &preferences, Utc::now()).await.map_err(internal)?;
    Ok(Json(preferences))
}
