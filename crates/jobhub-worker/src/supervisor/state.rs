//! Pool lifecycle states and the status record published to observers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobhub_core::types::id::WorkerId;

/// Lifecycle state of a worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    /// The first incarnation is launched but has not answered a probe yet.
    Starting,
    /// The worker answers probes.
    Running,
    /// A new incarnation is being launched after a failure.
    Restarting,
    /// Terminal. In-flight jobs have been failed.
    Closed,
}

impl PoolState {
    /// Whether the pool can still execute jobs.
    pub fn is_open(self) -> bool {
        !matches!(self, PoolState::Closed)
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoolState::Starting => "starting",
            PoolState::Running => "running",
            PoolState::Restarting => "restarting",
            PoolState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Signals from the process hosting a pool's worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The host restarted the worker; launch a new main loop.
    Restarted,
    /// The host thread is gone for good.
    ThreadClosed,
    /// The worker hit an error it could not recover from.
    Error(String),
}

/// Snapshot of a pool published on every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Pool name.
    pub pool: String,
    /// Current lifecycle state.
    pub state: PoolState,
    /// Id of the current runner incarnation, if one is live.
    pub worker_id: Option<WorkerId>,
    /// Total restarts since the pool started.
    pub restarts: u32,
    /// Most recent failure reason.
    pub last_error: Option<String>,
    /// Jobs taken from this pool's queues and not yet resolved.
    pub in_flight: usize,
    /// When this record was produced.
    pub updated_at: DateTime<Utc>,
}

impl PoolStatus {
    /// Initial status for a pool that is about to launch.
    pub fn starting(pool: &str) -> Self {
        Self {
            pool: pool.to_string(),
            state: PoolState::Starting,
            worker_id: None,
            restarts: 0,
            last_error: None,
            in_flight: 0,
            updated_at: Utc::now(),
        }
    }
}
