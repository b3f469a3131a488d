//! Route definitions for the JobHub HTTP API.
//!
//! All routes are mounted under `/api`.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete Axum router.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .merge(health_routes())
        .merge(metrics_routes())
        .merge(pool_routes());

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health endpoint
fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health::health))
}

/// Queue counters and depths
fn metrics_routes() -> Router<AppState> {
    Router::new().route("/metrics", get(handlers::metrics::metrics))
}

/// Supervisor status records
fn pool_routes() -> Router<AppState> {
    Router::new()
        .route("/pools", get(handlers::pools::list_pools))
        .route("/pools/{name}", get(handlers::pools::get_pool))
}
