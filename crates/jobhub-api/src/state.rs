//! Application state shared across all handlers.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

use jobhub_core::config::AppConfig;
use jobhub_worker::{PoolStatus, StatsSource};

/// Application state containing all shared dependencies.
///
/// Passed to every Axum handler via `State<AppState>`.
/// All fields are cheap to clone across tasks.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// Dispatcher counters and queue depths
    pub stats: Arc<dyn StatsSource>,
    /// Status feed of every supervised pool
    pub pools: Arc<Vec<watch::Receiver<PoolStatus>>>,
    /// When the server started
    pub started_at: Instant,
}

impl AppState {
    /// Build state for a dispatcher and its pools.
    pub fn new(
        config: Arc<AppConfig>,
        stats: Arc<dyn StatsSource>,
        pools: Vec<watch::Receiver<PoolStatus>>,
    ) -> Self {
        Self {
            config,
            stats,
            pools: Arc::new(pools),
            started_at: Instant::now(),
        }
    }

    /// Latest status of every pool, in configuration order.
    pub fn pool_statuses(&self) -> Vec<PoolStatus> {
        self.pools.iter().map(|rx| rx.borrow().clone()).collect()
    }
}
