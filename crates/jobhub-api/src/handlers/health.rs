//! Health check handler.

use axum::Json;
use axum::extract::State;

use crate::dto::response::{ApiResponse, HealthResponse};
use crate::state::AppState;

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let statuses = state.pool_statuses();
    let pools_open = statuses.iter().filter(|s| s.state.is_open()).count();
    let status = if pools_open == statuses.len() {
        "ok"
    } else {
        "degraded"
    };

    Json(ApiResponse::ok(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        pools_open,
        pools_total: statuses.len(),
        workers_enabled: state.config.worker.enabled,
    }))
}
