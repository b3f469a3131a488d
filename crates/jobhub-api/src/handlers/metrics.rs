//! Dispatcher metrics handler.

use axum::Json;
use axum::extract::State;

use jobhub_worker::dispatcher::DispatchStats;

use crate::dto::response::ApiResponse;
use crate::state::AppState;

/// GET /api/metrics
pub async fn metrics(State(state): State<AppState>) -> Json<ApiResponse<DispatchStats>> {
    Json(ApiResponse::ok(state.stats.stats()))
}
