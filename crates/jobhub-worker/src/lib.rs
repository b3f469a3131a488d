//! Job queueing and worker dispatch for JobHub.
//!
//! This crate provides:
//! - Named FIFO queues with single-waiter long polling and interrupts
//! - A dispatcher facade for submit-for-result, fire-and-forget, and broadcast
//! - The worker channel, executor, and runner that consume those queues
//! - Per-queue metrics and fast-track pub/sub for worker notifications
//! - A lifecycle supervisor that probes, restarts, and closes worker pools
//! - Built-in studio job implementations

pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod fast_track;
pub mod job;
pub mod jobs;
pub mod metrics;
pub mod queue;
pub mod runner;
pub mod supervisor;
pub mod tracker;

pub use dispatcher::{Dispatcher, JobHandle, StatsSource, join_best_effort};
pub use error::{DispatchError, DispatchResult};
pub use job::{JobKind, JobSpec, JobTimings};
pub use runner::WorkerRunner;
pub use supervisor::{LifecycleEvent, PoolHandle, PoolState, PoolStatus, PoolSupervisor};
