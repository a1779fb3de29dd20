use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use batchline_core::types::Channel;
use batchline_stagea::{AckOutcome, Decision};
use batchline_webhook::{parse_email_request, parse_telephony_request};

use crate::app::AppState;
use crate::http::twiml::Twiml;

/// POST /whatsapp
pub async fn whatsapp_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    telephony_handler(state, Channel::Whatsapp, "/whatsapp", headers, body).await
}

/// POST /sms
pub async fn sms_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    telephony_handler(state, Channel::Sms, "/sms", headers, body).await
}

/// Shared handling for the two telephony-style channels: parse the
/// `x-www-form-urlencoded` body, hand it to Stage A, and render the
/// decision as TwiML. A malformed request never reaches Stage A — it
/// fails to parse before any collaborator I/O, per SPEC_FULL.md §4.3.
async fn telephony_handler(
    state: Arc<AppState>,
    channel: Channel,
    path: &str,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let signature = headers
        .get("x-twilio-signature")
        .and_then(|v| v.to_str().ok());

    let parsed = match parse_telephony_request(channel, host, "", path, signature, &body) {
        Ok(p) => p,
        Err(e) => {
            warn!(%channel, "failed to parse telephony webhook: {e}");
            return Twiml::empty().into_response();
        }
    };

    decision_to_telephony_response(state.stage_a.handle_webhook(parsed).await)
}

/// POST /email — JSON in, JSON out; there is no provider signature scheme
/// to verify for this channel.
pub async fn email_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let parsed = match parse_email_request(host, "", "/email", &body) {
        Ok(p) => p,
        Err(e) => {
            warn!("failed to parse email webhook: {e}");
            return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response();
        }
    };

    decision_to_json_response(state.stage_a.handle_webhook(parsed).await)
}

fn decision_to_telephony_response(decision: Decision) -> Response {
    match decision {
        Decision::Ack(AckOutcome::Empty) => Twiml::empty().into_response(),
        Decision::Ack(AckOutcome::ConversationLocked) => {
            Twiml::message("Please wait, we are processing your previous message.").into_response()
        }
        // Anti-oracle policy: every other non-transient error still acks
        // with empty TwiML so the provider never learns why a message was
        // rejected.
        Decision::Ack(AckOutcome::Error { code, message }) => {
            warn!(%code, %message, "webhook acked with empty TwiML after a classified error");
            Twiml::empty().into_response()
        }
        Decision::Retry(reason) => {
            warn!(%reason, "webhook failing with 500 so the provider retries");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn decision_to_json_response(decision: Decision) -> Response {
    match decision {
        Decision::Ack(AckOutcome::Empty) => Json(json!({"ok": true})).into_response(),
        Decision::Ack(AckOutcome::ConversationLocked) => (
            StatusCode::OK,
            Json(json!({"ok": true, "code": "CONVERSATION_LOCKED"})),
        )
            .into_response(),
        Decision::Ack(AckOutcome::Error { code, message }) => (
            StatusCode::OK,
            Json(json!({"ok": false, "code": code, "message": message})),
        )
            .into_response(),
        Decision::Retry(reason) => {
            warn!(%reason, "webhook failing with 500 so the provider retries");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"ok": false, "code": "TRANSIENT", "message": reason})),
            )
                .into_response()
        }
    }
}
