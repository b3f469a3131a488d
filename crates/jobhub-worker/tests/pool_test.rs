//! Supervised pools running real runners end to end.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

use jobhub_core::config::worker::{PoolConfig, WorkerConfig};
use jobhub_worker::executor::{JobContext, JobExecutionError, JobExecutor, JobProcessor};
use jobhub_worker::jobs::studio::{PlaylistItem, TIMELINE_KIND, Timeline, studio_pool, studio_queue};
use jobhub_worker::jobs::{StudioJob, StudioJobProcessor};
use jobhub_worker::supervisor::{Incarnation, RunnerLauncher, WorkerLauncher};
use jobhub_worker::{
    DispatchError, Dispatcher, JobSpec, LifecycleEvent, PoolHandle, PoolState, PoolSupervisor,
    StatsSource,
};

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        concurrency: 2,
        probe_interval_ms: 10,
        freeze_timeout_ms: 50,
        restart_backoff_initial_ms: 5,
        restart_backoff_max_ms: 20,
        max_restarts: 3,
        drain_timeout_ms: 500,
        ..WorkerConfig::default()
    }
}

fn ping(message: &str) -> StudioJob {
    StudioJob::Ping {
        message: message.to_string(),
    }
}

/// Sleeps before handing the job to the studio processor.
#[derive(Debug)]
struct SlowProcessor {
    delay: Duration,
    inner: StudioJobProcessor,
}

#[async_trait]
impl JobProcessor<StudioJob> for SlowProcessor {
    async fn process(
        &self,
        job: &JobSpec<StudioJob>,
        ctx: &JobContext<StudioJob>,
    ) -> Result<Value, JobExecutionError> {
        time::sleep(self.delay).await;
        self.inner.process(job, ctx).await
    }
}

/// Panics on every job.
#[derive(Debug)]
struct PanickingProcessor;

#[async_trait]
impl JobProcessor<StudioJob> for PanickingProcessor {
    async fn process(
        &self,
        _job: &JobSpec<StudioJob>,
        _ctx: &JobContext<StudioJob>,
    ) -> Result<Value, JobExecutionError> {
        panic!("processor bug");
    }
}

/// Answers probes but never polls, leaving queues to the test.
#[derive(Debug)]
struct ProbeOnlyLauncher;

impl WorkerLauncher for ProbeOnlyLauncher {
    fn launch(&self, incarnation: Incarnation) -> JoinHandle<()> {
        let Incarnation {
            worker_id,
            mut probes,
            cancel,
            ..
        } = incarnation;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    probe = probes.recv() => match probe {
                        Some(reply) => {
                            let _ = reply.send(worker_id);
                        }
                        None => return,
                    },
                }
            }
        })
    }
}

/// Real runners whose first incarnation polls its queues but never
/// answers the supervisor's probes.
#[derive(Debug)]
struct FreezeFirstLauncher {
    inner: RunnerLauncher<StudioJob>,
    launches: AtomicUsize,
}

impl WorkerLauncher for FreezeFirstLauncher {
    fn launch(&self, incarnation: Incarnation) -> JoinHandle<()> {
        if self.launches.fetch_add(1, Ordering::SeqCst) > 0 {
            return self.inner.launch(incarnation);
        }

        let Incarnation {
            worker_id,
            probes,
            cancel,
            scope,
        } = incarnation;
        let (silent_tx, silent_rx) = mpsc::channel(1);
        let runner = self.inner.launch(Incarnation {
            worker_id,
            probes: silent_rx,
            cancel: cancel.clone(),
            scope,
        });
        tokio::spawn(async move {
            // Holding the probe receiver unread makes probes time out.
            let _probes = probes;
            let _silent = silent_tx;
            cancel.cancelled().await;
            runner.abort();
        })
    }
}

fn studio_handle(d: &Dispatcher<StudioJob>, processor: Arc<dyn JobProcessor<StudioJob>>) -> PoolHandle {
    PoolSupervisor::spawn_for(d, processor, studio_pool("s0"), fast_config())
}

#[tokio::test]
async fn test_timeline_job_round_trip_with_fast_track() {
    let d = Dispatcher::<StudioJob>::new();
    let pool = studio_handle(&d, Arc::new(StudioJobProcessor::new()));
    let mut updates = d.fast_track().subscribe(TIMELINE_KIND, &["s0"]);

    let handle = d
        .submit_for_result::<Timeline>(
            &studio_queue("s0"),
            StudioJob::GenerateTimeline {
                studio: "s0".to_string(),
                playlist: vec![
                    PlaylistItem {
                        id: "intro".to_string(),
                        duration_ms: 500,
                    },
                    PlaylistItem {
                        id: "main".to_string(),
                        duration_ms: 1500,
                    },
                ],
            },
        )
        .unwrap();

    let (result, timings) = handle.wait_with_timings().await;
    let timeline = result.unwrap();
    assert_eq!(timeline.total_ms, 2000);

    let timings = timings.unwrap();
    assert!(timings.started_time.is_some());
    assert!(timings.finished_time >= timings.started_time);

    let pushed = time::timeout(Duration::from_secs(1), updates.recv())
        .await
        .unwrap()
        .unwrap();
    let pushed: Timeline = serde_json::from_value(pushed).unwrap();
    assert_eq!(pushed, timeline);

    assert_eq!(pool.wait_for_state(PoolState::Running).await.state, PoolState::Running);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_processor_failure_reaches_caller_and_pool_keeps_running() {
    let d = Dispatcher::<StudioJob>::new();
    let pool = studio_handle(&d, Arc::new(StudioJobProcessor::new()));

    let handle = d
        .submit_for_result::<Value>(
            &studio_queue("s0"),
            StudioJob::GenerateTimeline {
                studio: "s0".to_string(),
                playlist: Vec::new(),
            },
        )
        .unwrap();
    assert!(matches!(handle.wait().await, Err(DispatchError::WorkerReported(_))));

    let again = d.submit_for_result::<Value>(&studio_queue("s0"), ping("still here")).unwrap();
    assert_eq!(again.wait().await.unwrap()["pong"], "still here");
    assert!(pool.status().state.is_open());
    pool.shutdown().await;
}

#[tokio::test]
async fn test_panicking_processor_is_reported_as_failure() {
    let d = Dispatcher::<StudioJob>::new();
    let pool = studio_handle(&d, Arc::new(PanickingProcessor));

    let handle = d.submit_for_result::<Value>(&studio_queue("s0"), ping("x")).unwrap();
    assert!(matches!(handle.wait().await, Err(DispatchError::WorkerReported(_))));
    assert_eq!(d.metrics().queue(&studio_queue("s0")).failed, 1);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_jobs_queued_across_restart_are_processed() {
    let d = Dispatcher::<StudioJob>::new();
    let pool = studio_handle(&d, Arc::new(StudioJobProcessor::new()));
    pool.wait_for_state(PoolState::Running).await;

    pool.notify(LifecycleEvent::Restarted);
    let handle = d.submit_for_result::<Value>(&studio_queue("s0"), ping("after")).unwrap();

    let result = time::timeout(Duration::from_secs(2), handle.wait()).await.unwrap();
    assert_eq!(result.unwrap()["pong"], "after");

    let mut rx = pool.subscribe();
    let status = rx
        .wait_for(|s| s.restarts == 1 && s.state == PoolState::Running)
        .await
        .unwrap()
        .clone();
    assert_eq!(status.last_error.as_deref(), Some("worker restarted by host"));
    pool.shutdown().await;
}

#[tokio::test]
async fn test_thread_closed_fails_taken_job_and_ignores_late_report() {
    let d = Dispatcher::<StudioJob>::new();
    let pool = PoolSupervisor::spawn(
        PoolConfig {
            name: "s0".to_string(),
            queues: vec!["q".to_string()],
        },
        fast_config(),
        Arc::new(ProbeOnlyLauncher),
        Arc::clone(d.tracker()),
    );
    let worker = d.channel();

    let handle = d.submit_for_result::<Value>("q", ping("j")).unwrap();
    let spec = worker.get_next_job("q").unwrap();

    pool.notify(LifecycleEvent::ThreadClosed);
    assert_eq!(
        handle.wait().await,
        Err(DispatchError::WorkerClosed {
            pool: "s0".to_string()
        })
    );
    assert!(!worker.report_job_done(spec.id, None, None, Ok(Value::Null)));

    let status = pool.wait_for_state(PoolState::Closed).await;
    assert_eq!(status.last_error.as_deref(), Some("worker thread closed"));
    assert_eq!(status.in_flight, 0);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_running_jobs() {
    let d = Dispatcher::<StudioJob>::new();
    let pool = studio_handle(
        &d,
        Arc::new(SlowProcessor {
            delay: Duration::from_millis(50),
            inner: StudioJobProcessor::new(),
        }),
    );

    let handle = d.submit_for_result::<Value>(&studio_queue("s0"), ping("slow")).unwrap();
    while d.tracker().in_flight() == 0 {
        time::sleep(Duration::from_millis(5)).await;
    }

    pool.shutdown().await;
    assert_eq!(handle.wait().await.unwrap()["pong"], "slow");
}

#[tokio::test]
async fn test_shutdown_fails_jobs_that_outlive_drain() {
    let d = Dispatcher::<StudioJob>::new();
    let pool = PoolSupervisor::spawn_for(
        &d,
        Arc::new(SlowProcessor {
            delay: Duration::from_secs(30),
            inner: StudioJobProcessor::new(),
        }),
        studio_pool("s0"),
        WorkerConfig {
            drain_timeout_ms: 20,
            ..fast_config()
        },
    );

    let handle = d.submit_for_result::<Value>(&studio_queue("s0"), ping("stuck")).unwrap();
    while d.tracker().in_flight() == 0 {
        time::sleep(Duration::from_millis(5)).await;
    }

    pool.shutdown().await;
    assert_eq!(
        handle.wait().await,
        Err(DispatchError::WorkerClosed {
            pool: "s0".to_string()
        })
    );
    assert_eq!(d.tracker().in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_job_submitted_while_closing_is_never_left_in_flight() {
    for _ in 0..20 {
        let d = Dispatcher::<StudioJob>::new();
        let pool = PoolSupervisor::spawn_for(
            &d,
            Arc::new(StudioJobProcessor::new()),
            PoolConfig {
                name: "s0".to_string(),
                queues: vec!["q".to_string()],
            },
            fast_config(),
        );
        pool.wait_for_state(PoolState::Running).await;

        pool.notify(LifecycleEvent::ThreadClosed);
        let handle = d.submit_for_result::<Value>("q", ping("racing")).unwrap();
        pool.wait_for_state(PoolState::Closed).await;
        time::sleep(Duration::from_millis(20)).await;

        assert_eq!(d.tracker().in_flight(), 0);
        let pending = d
            .stats()
            .queues
            .iter()
            .find(|q| q.name == "q")
            .map(|q| q.pending)
            .unwrap_or(0);
        if pending == 0 {
            let result = time::timeout(Duration::from_secs(1), handle.wait())
                .await
                .expect("taken job must resolve");
            match result {
                Ok(value) => assert_eq!(value["pong"], "racing"),
                Err(err) => assert_eq!(
                    err,
                    DispatchError::WorkerClosed {
                        pool: "s0".to_string()
                    }
                ),
            }
        }
        pool.shutdown().await;
    }
}

#[tokio::test]
async fn test_job_queued_during_freeze_runs_after_restart() {
    let d = Dispatcher::<StudioJob>::new();
    let pool = studio_pool("s0");
    let launcher = FreezeFirstLauncher {
        inner: RunnerLauncher::new(
            d.channel(),
            JobExecutor::new(Arc::new(StudioJobProcessor::new())),
            pool.queues.clone(),
        ),
        launches: AtomicUsize::new(0),
    };
    let handle = PoolSupervisor::spawn(
        pool,
        WorkerConfig {
            restart_backoff_initial_ms: 100,
            restart_backoff_max_ms: 200,
            ..fast_config()
        },
        Arc::new(launcher),
        Arc::clone(d.tracker()),
    );

    let mut rx = handle.subscribe();
    rx.wait_for(|s| s.state == PoolState::Restarting).await.unwrap();
    let job = d
        .submit_for_result::<Value>(&studio_queue("s0"), ping("thawed"))
        .unwrap();

    let result = time::timeout(Duration::from_secs(2), job.wait()).await.unwrap();
    assert_eq!(result.unwrap()["pong"], "thawed");

    let status = handle.wait_for_state(PoolState::Running).await;
    assert_eq!(status.restarts, 1);
    assert_eq!(status.last_error.as_deref(), Some("worker frozen"));
    handle.shutdown().await;
}
