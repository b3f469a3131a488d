//! Worker pool status handlers.

use axum::Json;
use axum::extract::{Path, State};

use jobhub_core::error::AppError;
use jobhub_worker::PoolStatus;

use crate::dto::response::ApiResponse;
use crate::error::ApiError;
use crate::state::AppState;

/// GET /api/pools
pub async fn list_pools(State(state): State<AppState>) -> Json<ApiResponse<Vec<PoolStatus>>> {
    Json(ApiResponse::ok(state.pool_statuses()))
}

/// GET /api/pools/{name}
pub async fn get_pool(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<PoolStatus>>, ApiError> {
    state
        .pool_statuses()
        .into_iter()
        .find(|s| s.pool == name)
        .map(|s| Json(ApiResponse::ok(s)))
        .ok_or_else(|| AppError::not_found(format!("Worker pool '{}' not found", name)).into())
}
