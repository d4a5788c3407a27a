use axum::Json;
use serde_json::{json, Value};

/// GET /
pub async fn root() -> Json<Value> {
    Json(json!({"service": "whatsapp-gateway", "status": "running"}))
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({"status": "healthy"}))
}
