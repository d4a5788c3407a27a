use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use wag_core::{
    config::Config, domain::IncomingMessage, logging::pseudonymize,
    signature::verify_signature,
};

use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// GET /meta-whatsapp: subscription handshake from the Meta dashboard.
pub async fn verify(State(state): State<AppState>, Query(params): Query<VerifyQuery>) -> Response {
    if params.mode.as_deref() == Some("subscribe")
        && params.verify_token.as_deref() == Some(state.cfg.meta_verify_token.as_str())
    {
        tracing::info!("webhook verified successfully with meta");
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            params.challenge.unwrap_or_default(),
        )
            .into_response();
    }

    tracing::warn!("webhook verification failed");
    StatusCode::FORBIDDEN.into_response()
}

/// POST /meta-whatsapp: message deliveries.
///
/// Accepted messages are handed to their own task so Meta gets its 200
/// without waiting on the engine.
pub async fn receive(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if !verify_signature(
        &state.cfg.meta_app_secret,
        &body,
        header_str("x-hub-signature-256"),
        header_str("x-hub-signature"),
    ) {
        tracing::error!("invalid webhook signature");
        return unauthorized("Invalid signature");
    }

    let user_agent = header_str(header::USER_AGENT.as_str());
    if user_agent.map(str::trim) != Some(state.cfg.facebook_user_agent.as_str()) {
        tracing::error!(
            "invalid user agent: {:?}, expected: {}",
            user_agent,
            state.cfg.facebook_user_agent
        );
        return unauthorized("Invalid User Agent");
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("invalid json received: {e}");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid JSON"})),
            )
                .into_response();
        }
    };

    for message in accepted_messages(&payload, &state.cfg) {
        let handler = state.handler.clone();
        tokio::spawn(async move {
            handler.handle_incoming(&message).await;
        });
    }

    StatusCode::OK.into_response()
}

fn unauthorized(detail: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"detail": detail}))).into_response()
}

/// Walk `entry[].changes[].value.messages[]`, pairing each message with the
/// sender from `contacts[0].wa_id`.
pub fn iter_messages(payload: &Value) -> Vec<(String, &Value)> {
    let mut out = Vec::new();
    for entry in list(payload.get("entry")) {
        for change in list(entry.get("changes")) {
            let Some(value) = change.get("value") else {
                continue;
            };
            let user_id = value
                .pointer("/contacts/0/wa_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            for message in list(value.get("messages")) {
                out.push((user_id.clone(), message));
            }
        }
    }
    out
}

fn list(v: Option<&Value>) -> &[Value] {
    v.and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Parse and filter the messages of one delivery: unsupported kinds, stale
/// redeliveries and (in sandbox mode) strangers are dropped.
pub fn accepted_messages(payload: &Value, cfg: &Config) -> Vec<IncomingMessage> {
    iter_messages(payload)
        .into_iter()
        .filter_map(|(user_id, raw)| {
            let message = IncomingMessage::from_webhook(&user_id, raw, cfg.message_age_cutoff);
            accept(message, cfg)
        })
        .collect()
}

fn accept(message: IncomingMessage, cfg: &Config) -> Option<IncomingMessage> {
    let who = pseudonymize(cfg.log_pseudonym_secret.as_deref(), &message.user_id.0);
    tracing::info!(
        user = %who,
        "received {} message (id={}, age={}s)",
        message.message_type.as_str(),
        message.message_id.0,
        message.age()
    );

    if !message.is_supported_type() {
        tracing::warn!("unsupported message type: {}", message.message_type.as_str());
        return None;
    }
    if message.too_old() {
        tracing::warn!("message too old ({}s), dropping", message.age());
        return None;
    }
    if cfg.in_meta_sandbox_mode && message.user_id.0 != cfg.meta_sandbox_phone_number {
        tracing::warn!("sandbox mode: ignoring message from non-sandbox number");
        return None;
    }
    Some(message)
}
