//! Worker runner: the main loop that long-polls queues and executes jobs.
//!
//! One runner is one incarnation of a pool's worker. It owns a poller per
//! queue and answers liveness probes. Executions are spawned into the
//! pool's [`ExecutionScope`], so they outlive the runner that started them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use jobhub_core::types::id::WorkerId;

use crate::channel::{PollOutcome, WorkerChannel};
use crate::error::DispatchError;
use crate::executor::{JobContext, JobExecutor};
use crate::job::{JobKind, JobSpec};

/// A liveness probe: the runner answers with its id.
pub type Probe = oneshot::Sender<WorkerId>;

/// Pool-wide home for job executions.
///
/// Shared by every runner incarnation of a pool. Holds the concurrency
/// slots, tracks running executions, and can abandon them all at once.
/// An abandoned execution fails its job as closed.
#[derive(Debug, Clone)]
pub struct ExecutionScope {
    pool: Arc<str>,
    tasks: TaskTracker,
    abort: CancellationToken,
    slots: Arc<Semaphore>,
}

impl ExecutionScope {
    /// Create a scope for `pool` allowing `concurrency` executions at once.
    pub fn new(pool: &str, concurrency: usize) -> Self {
        Self {
            pool: Arc::from(pool),
            tasks: TaskTracker::new(),
            abort: CancellationToken::new(),
            slots: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Executions currently running.
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Wait up to `timeout` for running executions to finish.
    ///
    /// Returns `true` if everything finished in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tasks.close();
        time::timeout(timeout, self.tasks.wait()).await.is_ok()
    }

    /// Abandon every running execution without reporting it.
    pub fn abort(&self) {
        self.abort.cancel();
    }
}

/// Main worker runner that polls queues and executes jobs
#[derive(Debug)]
pub struct WorkerRunner<J> {
    worker_id: WorkerId,
    channel: WorkerChannel<J>,
    executor: JobExecutor<J>,
    queues: Vec<String>,
    scope: ExecutionScope,
}

impl<J: JobKind> WorkerRunner<J> {
    /// Create a runner for `queues`.
    pub fn new(
        worker_id: WorkerId,
        channel: WorkerChannel<J>,
        executor: JobExecutor<J>,
        queues: Vec<String>,
        scope: ExecutionScope,
    ) -> Self {
        Self {
            worker_id,
            channel,
            executor,
            queues,
            scope,
        }
    }

    /// Run until `cancel` fires or a poller dies.
    ///
    /// Probes are answered from this loop only, so a runner whose loop has
    /// stopped stops answering them.
    pub async fn run(self, mut probes: mpsc::Receiver<Probe>, cancel: CancellationToken) {
        tracing::info!(
            "Worker {} started with queues={:?}",
            self.worker_id.short(),
            self.queues
        );

        let runner = Arc::new(self);
        let mut pollers = JoinSet::new();
        for queue in runner.queues.clone() {
            let runner = Arc::clone(&runner);
            let cancel = cancel.clone();
            pollers.spawn(async move { runner.poll_queue(&queue, cancel).await });
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Worker {} received stop signal", runner.worker_id.short());
                    break;
                }
                Some(reply) = probes.recv() => {
                    let _ = reply.send(runner.worker_id);
                }
                Some(joined) = pollers.join_next() => {
                    if let Err(e) = joined {
                        tracing::error!("Worker {} poller crashed: {}", runner.worker_id.short(), e);
                    }
                    // Leaving the loop stops probe replies; the supervisor
                    // sees the worker as gone and restarts it.
                    break;
                }
            }
        }

        pollers.abort_all();
        tracing::info!("Worker {} stopped", runner.worker_id.short());
    }

    async fn poll_queue(&self, queue: &str, cancel: CancellationToken) {
        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                permit = Arc::clone(&self.scope.slots).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => return,
                },
            };

            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                polled = self.channel.poll_for_work(queue) => polled,
            };

            match polled {
                Ok(PollOutcome::Job(spec)) => self.spawn_execution(queue, spec, permit),
                Ok(PollOutcome::Interrupted) => {
                    tracing::debug!(
                        "Worker {} poll on '{}' interrupted",
                        self.worker_id.short(),
                        queue
                    );
                }
                Err(e) if e.is_superseded() => {
                    tracing::debug!("Worker {} re-polling '{}': {}", self.worker_id.short(), queue, e);
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    tracing::error!("Worker {} failed polling '{}': {}", self.worker_id.short(), queue, e);
                    return;
                }
            }
        }
    }

    fn spawn_execution(
        &self,
        queue: &str,
        spec: JobSpec<J>,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) {
        let channel = self.channel.clone();
        let executor = self.executor.clone();
        let abort = self.scope.abort.clone();
        let pool = Arc::clone(&self.scope.pool);
        let ctx = JobContext::new(self.worker_id, queue, channel.clone());

        self.scope.tasks.spawn(async move {
            let _permit = permit;
            let id = spec.id;

            tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    // A close may have run its fail pass before this job was
                    // taken; reporting here is a no-op otherwise.
                    let reported = channel.report_job_done(
                        id,
                        None,
                        None,
                        Err(DispatchError::WorkerClosed {
                            pool: pool.to_string(),
                        }),
                    );
                    tracing::debug!("Execution of job {} abandoned (reported={})", id, reported);
                }
                exec = executor.execute(&spec, &ctx) => {
                    let reported = channel.report_job_done(
                        id,
                        Some(exec.started_at),
                        Some(exec.finished_at),
                        exec.outcome,
                    );
                    if !reported {
                        tracing::debug!("Job {} was already resolved; dropping late report", id);
                    }
                }
            }
        });
    }
}
