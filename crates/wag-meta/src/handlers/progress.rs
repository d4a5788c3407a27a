use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use wag_core::{domain::UserId, engine::types::ProgressUpdate, logging::pseudonymize};

use crate::router::AppState;

/// POST /progress-callback: the engine reports intermediate progress while
/// it works on a message; the text goes straight to the user.
pub async fn progress_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    // Plain equality, unlike the HMAC check on the Meta webhook.
    if token != Some(state.cfg.progress_callback_token.as_str()) {
        tracing::warn!("progress callback rejected: bad token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Invalid token"})),
        );
    }

    let update: ProgressUpdate = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            tracing::error!("invalid progress payload: {e}");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid JSON"})),
            );
        }
    };

    tracing::debug!(
        user = %pseudonymize(state.cfg.log_pseudonym_secret.as_deref(), &update.user_id),
        message_key = %update.message_key,
        "progress update"
    );
    state
        .handler
        .send_progress(&UserId(update.user_id), &update.text)
        .await;

    (StatusCode::OK, Json(json!({"status": "ok"})))
}
