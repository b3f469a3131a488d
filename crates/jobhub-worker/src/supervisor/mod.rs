//! Lifecycle supervision for worker pools.
//!
//! A [`PoolSupervisor`] owns one pool: it launches runner incarnations,
//! probes them for liveness, restarts them with backoff when they freeze or
//! fail, and on close fails every in-flight job from the pool's queues.
//! Observers follow the pool through [`PoolHandle`].

mod backoff;
pub mod launcher;
pub mod probe;
pub mod state;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use jobhub_core::config::worker::{PoolConfig, WorkerConfig};
use jobhub_core::types::id::WorkerId;

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::executor::{JobExecutor, JobProcessor};
use crate::job::JobKind;
use crate::runner::{ExecutionScope, Probe};
use crate::tracker::CompletionTracker;

pub use self::backoff::Backoff;
pub use self::launcher::{Incarnation, RunnerLauncher, WorkerLauncher};
pub use self::probe::ProbeResult;
pub use self::state::{LifecycleEvent, PoolState, PoolStatus};

struct CurrentWorker {
    worker_id: WorkerId,
    cancel: CancellationToken,
    probes: mpsc::Sender<Probe>,
    task: JoinHandle<()>,
}

/// Supervises the worker of a single pool.
pub struct PoolSupervisor {
    pool: PoolConfig,
    config: WorkerConfig,
    owned: HashSet<String>,
    launcher: Arc<dyn WorkerLauncher>,
    tracker: Arc<CompletionTracker>,
    scope: ExecutionScope,
    status: watch::Sender<PoolStatus>,
    events: mpsc::UnboundedReceiver<LifecycleEvent>,
    shutdown: CancellationToken,
    current: Option<CurrentWorker>,
    backoff: Backoff,
    restarts: u32,
    unhealthy_restarts: u32,
}

impl PoolSupervisor {
    /// Start supervising `pool` with a custom launcher.
    pub fn spawn(
        pool: PoolConfig,
        config: WorkerConfig,
        launcher: Arc<dyn WorkerLauncher>,
        tracker: Arc<CompletionTracker>,
    ) -> PoolHandle {
        let (status_tx, status_rx) = watch::channel(PoolStatus::starting(&pool.name));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let supervisor = Self {
            owned: pool.queues.iter().cloned().collect(),
            scope: ExecutionScope::new(&pool.name, config.concurrency),
            backoff: Backoff::new(config.restart_backoff_initial(), config.restart_backoff_max()),
            pool: pool.clone(),
            config,
            launcher,
            tracker,
            status: status_tx,
            events: events_rx,
            shutdown: shutdown.clone(),
            current: None,
            restarts: 0,
            unhealthy_restarts: 0,
        };
        let task = tokio::spawn(supervisor.run());

        PoolHandle {
            name: pool.name,
            events: events_tx,
            status: status_rx,
            shutdown,
            task,
        }
    }

    /// Start supervising `pool` with runners that execute jobs from
    /// `dispatcher` through `processor`.
    pub fn spawn_for<J: JobKind>(
        dispatcher: &Dispatcher<J>,
        processor: Arc<dyn JobProcessor<J>>,
        pool: PoolConfig,
        config: WorkerConfig,
    ) -> PoolHandle {
        let launcher = RunnerLauncher::new(
            dispatcher.channel(),
            JobExecutor::new(processor),
            pool.queues.clone(),
        );
        Self::spawn(pool, config, Arc::new(launcher), Arc::clone(dispatcher.tracker()))
    }

    async fn run(mut self) {
        tracing::info!(
            "Starting worker pool '{}' with concurrency={}, queues={:?}",
            self.pool.name,
            self.config.concurrency,
            self.pool.queues
        );
        self.launch();
        self.publish(PoolState::Starting, None);

        let mut ticker = time::interval(self.config.probe_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.close("pool shut down".to_string(), true).await;
                    return;
                }
                event = self.events.recv() => {
                    let keep_running = match event {
                        Some(LifecycleEvent::Restarted) => {
                            self.restart("worker restarted by host".to_string()).await
                        }
                        Some(LifecycleEvent::Error(detail)) => {
                            tracing::warn!("Worker pool '{}' reported error: {}", self.pool.name, detail);
                            self.restart(detail).await
                        }
                        Some(LifecycleEvent::ThreadClosed) => {
                            self.close("worker thread closed".to_string(), false).await;
                            false
                        }
                        None => {
                            self.close("pool handle dropped".to_string(), true).await;
                            false
                        }
                    };
                    if !keep_running {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if !self.check_liveness().await {
                        return;
                    }
                }
            }
        }
    }

    /// Probe the current worker; returns `false` once the pool is closed.
    async fn check_liveness(&mut self) -> bool {
        let Some(probes) = self.current.as_ref().map(|c| c.probes.clone()) else {
            return true;
        };

        let result = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return true,
            result = probe::probe(&probes, self.config.freeze_timeout()) => result,
        };

        match result {
            ProbeResult::Alive(worker_id) => {
                if self.status.borrow().state != PoolState::Running {
                    tracing::info!(
                        "Worker pool '{}' running (worker {})",
                        self.pool.name,
                        worker_id.short()
                    );
                    self.unhealthy_restarts = 0;
                    self.backoff.reset();
                }
                self.publish(PoolState::Running, None);
                true
            }
            ProbeResult::Frozen => {
                tracing::warn!(
                    "Worker pool '{}' did not answer a probe within {:?}",
                    self.pool.name,
                    self.config.freeze_timeout()
                );
                self.restart("worker frozen".to_string()).await
            }
            ProbeResult::Gone => {
                tracing::warn!("Worker pool '{}' main loop exited", self.pool.name);
                self.restart("worker main loop exited".to_string()).await
            }
        }
    }

    /// Replace the current incarnation; returns `false` if the pool closed
    /// instead.
    async fn restart(&mut self, reason: String) -> bool {
        self.restarts += 1;
        self.unhealthy_restarts += 1;
        if self.unhealthy_restarts > self.config.max_restarts {
            self.close(
                format!(
                    "giving up after {} restarts: {}",
                    self.config.max_restarts, reason
                ),
                false,
            )
            .await;
            return false;
        }

        self.retire_current();
        self.publish(PoolState::Restarting, Some(reason.clone()));

        let delay = self.backoff.next_delay();
        tracing::warn!(
            "Restarting worker pool '{}' in {:?} (attempt {}/{}): {}",
            self.pool.name,
            delay,
            self.unhealthy_restarts,
            self.config.max_restarts,
            reason
        );

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                self.close("pool shut down".to_string(), true).await;
                return false;
            }
            _ = time::sleep(delay) => {}
        }

        self.launch();
        self.publish(PoolState::Restarting, None);
        true
    }

    /// Enter the terminal state, failing every in-flight job of this pool.
    async fn close(&mut self, reason: String, graceful: bool) {
        self.retire_current();

        if graceful && !self.scope.drain(self.config.drain_timeout()).await {
            tracing::warn!(
                "Worker pool '{}' did not drain within {:?}",
                self.pool.name,
                self.config.drain_timeout()
            );
        }
        self.scope.abort();

        let failed = self.tracker.fail_all(
            |queue| self.owned.contains(queue),
            DispatchError::WorkerClosed {
                pool: self.pool.name.clone(),
            },
        );
        if failed > 0 {
            tracing::warn!(
                "Failed {} in-flight jobs of worker pool '{}'",
                failed,
                self.pool.name
            );
        }

        if graceful {
            tracing::info!("Worker pool '{}' closed: {}", self.pool.name, reason);
            self.publish(PoolState::Closed, None);
        } else {
            tracing::error!("Worker pool '{}' closed: {}", self.pool.name, reason);
            self.publish(PoolState::Closed, Some(reason));
        }
    }

    fn launch(&mut self) {
        let worker_id = WorkerId::new();
        let (probe_tx, probe_rx) = mpsc::channel(1);
        let cancel = self.shutdown.child_token();

        let task = self.launcher.launch(Incarnation {
            worker_id,
            probes: probe_rx,
            cancel: cancel.clone(),
            scope: self.scope.clone(),
        });
        tracing::debug!(
            "Launched worker {} for pool '{}'",
            worker_id.short(),
            self.pool.name
        );

        self.current = Some(CurrentWorker {
            worker_id,
            cancel,
            probes: probe_tx,
            task,
        });
    }

    fn retire_current(&mut self) {
        if let Some(current) = self.current.take() {
            current.cancel.cancel();
            current.task.abort();
            tracing::debug!(
                "Retired worker {} of pool '{}'",
                current.worker_id.short(),
                self.pool.name
            );
        }
    }

    fn publish(&self, state: PoolState, last_error: Option<String>) {
        let in_flight = self
            .tracker
            .in_flight_for(|queue| self.owned.contains(queue));
        let worker_id = self.current.as_ref().map(|c| c.worker_id);
        let restarts = self.restarts;

        self.status.send_modify(|status| {
            status.state = state;
            status.worker_id = worker_id;
            status.restarts = restarts;
            status.in_flight = in_flight;
            status.updated_at = Utc::now();
            if last_error.is_some() {
                status.last_error = last_error;
            }
        });
    }
}

/// Observer and control handle for a supervised pool.
#[derive(Debug)]
pub struct PoolHandle {
    name: String,
    events: mpsc::UnboundedSender<LifecycleEvent>,
    status: watch::Receiver<PoolStatus>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl PoolHandle {
    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Forward a lifecycle event from the worker host.
    pub fn notify(&self, event: LifecycleEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Worker pool '{}' is closed; event dropped", self.name);
        }
    }

    /// Latest published status.
    pub fn status(&self) -> PoolStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<PoolStatus> {
        self.status.clone()
    }

    /// Wait until the pool publishes `state`.
    ///
    /// Returns the last status if the pool stops before reaching it.
    pub async fn wait_for_state(&self, state: PoolState) -> PoolStatus {
        let mut rx = self.status.clone();
        match rx.wait_for(|status| status.state == state).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        }
    }

    /// Close the pool, letting in-flight jobs drain first.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            tracing::error!("Worker pool '{}' supervisor failed: {}", self.name, e);
        }
    }
}
