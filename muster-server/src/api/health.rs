//! Health Check API Handler

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::api::AppState;

/// GET /health
/// Liveness probe, reports how many workers are connected
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let workers = state.pipeline.workers().await.len();
    Json(json!({ "status": "ok", "workers": workers }))
}
