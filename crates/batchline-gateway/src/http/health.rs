use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /health — liveness probe (SPEC_FULL.md §8, grounded on
/// `skynet-gateway::http::health`).
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "gateway_port": state.config.gateway.port,
        "worker_count": state.config.workers.count,
    }))
}
