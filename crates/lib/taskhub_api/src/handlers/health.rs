//! Liveness endpoints.

use axum::Json;
use serde_json::{Value, json};

use crate::response::timestamp;

/// `GET /api`
pub async fn root() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "API is running",
        "timestamp": timestamp(),
    }))
}

/// `GET /api/health`
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "API is healthy",
        "timestamp": timestamp(),
    }))
}
