//! # jobhub-api
//!
//! HTTP status surface for JobHub built on Axum. Exposes health, queue
//! metrics, and worker pool status as JSON under `/api`.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use error::ApiError;
pub use router::build_router;
pub use state::AppState;
