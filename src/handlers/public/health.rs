// handlers/public/health.rs - GET /health handler

use axum::{extract::State, response::Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// Liveness plus whether the rate limiter is running on local counters
pub async fn health_get(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "environment": state.config.environment,
            "rate_limit_degraded": state.limiter.is_degraded(),
        }
    }))
}
