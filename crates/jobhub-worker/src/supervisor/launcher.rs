//! Starting runner incarnations.

use std::fmt;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use jobhub_core::types::id::WorkerId;

use crate::channel::WorkerChannel;
use crate::executor::JobExecutor;
use crate::job::JobKind;
use crate::runner::{ExecutionScope, Probe, WorkerRunner};

/// Everything one incarnation of a worker loop is started with.
#[derive(Debug)]
pub struct Incarnation {
    /// Fresh id for this incarnation.
    pub worker_id: WorkerId,
    /// Liveness probes from the supervisor.
    pub probes: mpsc::Receiver<Probe>,
    /// Fires when the supervisor retires this incarnation.
    pub cancel: CancellationToken,
    /// Pool-wide execution scope, shared across incarnations.
    pub scope: ExecutionScope,
}

/// Starts worker main loops on behalf of a supervisor.
pub trait WorkerLauncher: Send + Sync + fmt::Debug {
    /// Spawn a new incarnation and return its task handle.
    fn launch(&self, incarnation: Incarnation) -> JoinHandle<()>;
}

/// Launches [`WorkerRunner`]s over a dispatcher channel.
#[derive(Debug)]
pub struct RunnerLauncher<J> {
    channel: WorkerChannel<J>,
    executor: JobExecutor<J>,
    queues: Vec<String>,
}

impl<J: JobKind> RunnerLauncher<J> {
    /// Create a launcher for runners consuming `queues`.
    pub fn new(channel: WorkerChannel<J>, executor: JobExecutor<J>, queues: Vec<String>) -> Self {
        Self {
            channel,
            executor,
            queues,
        }
    }
}

impl<J: JobKind> WorkerLauncher for RunnerLauncher<J> {
    fn launch(&self, incarnation: Incarnation) -> JoinHandle<()> {
        let runner = WorkerRunner::new(
            incarnation.worker_id,
            self.channel.clone(),
            self.executor.clone(),
            self.queues.clone(),
            incarnation.scope,
        );
        tokio::spawn(runner.run(incarnation.probes, incarnation.cancel))
    }
}
