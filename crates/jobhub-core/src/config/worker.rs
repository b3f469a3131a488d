//! Worker pool and supervisor configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Worker pool configuration shared by every supervised pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether worker pools are started at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum number of jobs a pool executes at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Interval between liveness probes, in milliseconds.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,
    /// A probe not answered within this window marks the worker frozen.
    #[serde(default = "default_freeze_timeout")]
    pub freeze_timeout_ms: u64,
    /// First restart delay, in milliseconds.
    #[serde(default = "default_backoff_initial")]
    pub restart_backoff_initial_ms: u64,
    /// Upper bound for the restart delay, in milliseconds.
    #[serde(default = "default_backoff_max")]
    pub restart_backoff_max_ms: u64,
    /// Consecutive restarts without a healthy probe before the pool closes.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// How long a closing pool waits for in-flight jobs, in milliseconds.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
    /// Pools to start. Each pool consumes a fixed set of queues.
    #[serde(default = "default_pools")]
    pub pools: Vec<PoolConfig>,
}

/// One worker pool and the queues it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool name, used in logs and status records.
    pub name: String,
    /// Queue names consumed by this pool.
    pub queues: Vec<String>,
}

impl WorkerConfig {
    /// Liveness probe interval.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Freeze detection window.
    pub fn freeze_timeout(&self) -> Duration {
        Duration::from_millis(self.freeze_timeout_ms)
    }

    /// Initial restart backoff.
    pub fn restart_backoff_initial(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_initial_ms)
    }

    /// Maximum restart backoff.
    pub fn restart_backoff_max(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_max_ms)
    }

    /// Shutdown drain window.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Check invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.concurrency == 0 {
            return Err(AppError::configuration(
                "worker.concurrency must be greater than 0",
            ));
        }
        if self.freeze_timeout_ms == 0 || self.probe_interval_ms == 0 {
            return Err(AppError::configuration(
                "worker probe interval and freeze timeout must be non-zero",
            ));
        }
        if self.restart_backoff_max_ms < self.restart_backoff_initial_ms {
            return Err(AppError::configuration(
                "worker.restart_backoff_max_ms must be >= restart_backoff_initial_ms",
            ));
        }
        let mut owners: HashMap<&str, &str> = HashMap::new();
        for pool in &self.pools {
            if pool.name.trim().is_empty() {
                return Err(AppError::configuration("worker pool name must not be empty"));
            }
            if pool.queues.is_empty() || pool.queues.iter().any(|q| q.trim().is_empty()) {
                return Err(AppError::configuration(format!(
                    "worker pool '{}' must list at least one non-empty queue",
                    pool.name
                )));
            }
            for queue in &pool.queues {
                if let Some(owner) = owners.insert(queue.as_str(), pool.name.as_str()) {
                    return Err(AppError::configuration(format!(
                        "queue '{}' is listed by worker pool '{}' and '{}'",
                        queue, owner, pool.name
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: default_concurrency(),
            probe_interval_ms: default_probe_interval(),
            freeze_timeout_ms: default_freeze_timeout(),
            restart_backoff_initial_ms: default_backoff_initial(),
            restart_backoff_max_ms: default_backoff_max(),
            max_restarts: default_max_restarts(),
            drain_timeout_ms: default_drain_timeout(),
            pools: default_pools(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    4
}

fn default_probe_interval() -> u64 {
    1_000
}

fn default_freeze_timeout() -> u64 {
    5_000
}

fn default_backoff_initial() -> u64 {
    250
}

fn default_backoff_max() -> u64 {
    10_000
}

fn default_max_restarts() -> u32 {
    5
}

fn default_drain_timeout() -> u64 {
    10_000
}

fn default_pools() -> Vec<PoolConfig> {
    vec![PoolConfig {
        name: "studio0".to_string(),
        queues: vec![
            "studio0.studio".to_string(),
            "studio0.ingest".to_string(),
            "studio0.events".to_string(),
        ],
    }]
}
