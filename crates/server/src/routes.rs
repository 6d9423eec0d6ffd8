//! HTTP routes.
//!
//! The webhook always reads the raw body: a malformed payload is
//! acknowledged as a no-op rather than rejected, so the provider does not
//! redeliver it forever. A body over the configured limit cannot be
//! classified; it is answered with 413 and logged at error level so the
//! unread transcript is visible to operators.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::{HeaderMap, StatusCode, header},
    routing::{get, post},
};
use ray_core::detection::parse_payload;
use ray_core::incident::ProcessError;
use serde::Serialize;
use uuid::Uuid;

use crate::server::AppState;

type AppStateArc = Arc<AppState>;

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct WebhookError {
    pub error: &'static str,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub rules_version: String,
    pub uptime_secs: u64,
}

// ============================================================================
// Webhook Routes
// ============================================================================

pub fn webhook_routes() -> Router<AppStateArc> {
    Router::new().route("/api/elevenlabs", post(conversation_webhook))
}

async fn conversation_webhook(
    State(state): State<AppStateArc>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<WebhookAck>, (StatusCode, Json<WebhookError>)> {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return Err(unread_body(&headers, &rejection)),
    };
    let payload = parse_payload(&body);

    match state.policy.process(&payload).await {
        Ok(outcome) => Ok(Json(WebhookAck {
            status: "processed",
            outcome: outcome.as_str(),
            incident_id: outcome.incident_id(),
        })),
        Err(e) => {
            tracing::error!(
                conversation_id = ?payload.conversation_id,
                error = %e,
                "webhook processing failed, requesting redelivery"
            );
            let (kind, incident_id) = match &e {
                ProcessError::Store(_) => ("store_unavailable", None),
                ProcessError::Notification { incident_id, .. } => {
                    ("notification_failed", Some(*incident_id))
                }
            };
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WebhookError {
                    error: "Internal Server Error",
                    kind,
                    incident_id,
                }),
            ))
        }
    }
}

/// The transcript was never read, so nothing was classified or recorded.
fn unread_body(headers: &HeaderMap, rejection: &BytesRejection) -> (StatusCode, Json<WebhookError>) {
    let status = rejection.status();
    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let kind = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "payload_too_large"
    } else {
        "unreadable_body"
    };
    tracing::error!(
        status = status.as_u16(),
        content_length = ?content_length,
        reason = %rejection.body_text(),
        "webhook body not read, transcript NOT classified"
    );
    (
        status,
        Json(WebhookError {
            error: "Webhook body rejected",
            kind,
            incident_id: None,
        }),
    )
}

// ============================================================================
// Health Routes
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/healthz", get(healthz))
}

async fn healthz(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        rules_version: state.policy.rules().version().to_owned(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
