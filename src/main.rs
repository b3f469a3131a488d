//! JobHub Server: job queue and supervised worker pools.
//!
//! Main entry point that wires the crates together and starts the server.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt};

use jobhub_api::{AppState, build_router};
use jobhub_core::config::AppConfig;
use jobhub_core::error::AppError;
use jobhub_core::result::AppResult;
use jobhub_worker::jobs::{StudioJob, StudioJobProcessor};
use jobhub_worker::{Dispatcher, PoolHandle, PoolSupervisor, StatsSource};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from files and environment
fn load_configuration() -> AppResult<AppConfig> {
    let env = std::env::var("JOBHUB_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting JobHub v{}", env!("CARGO_PKG_VERSION"));
    let config = Arc::new(config);

    // ── Step 1: Dispatcher ───────────────────────────────────────
    let dispatcher = Dispatcher::<StudioJob>::new();

    // ── Step 2: Supervised worker pools ──────────────────────────
    let mut pools: Vec<PoolHandle> = Vec::new();
    if config.worker.enabled {
        let processor = Arc::new(StudioJobProcessor::new());
        for pool in &config.worker.pools {
            pools.push(PoolSupervisor::spawn_for(
                &dispatcher,
                processor.clone(),
                pool.clone(),
                config.worker.clone(),
            ));
        }
        spawn_startup_pings(&dispatcher, &config);
    } else {
        tracing::info!("Worker pools disabled by configuration");
    }

    // ── Step 3: HTTP surface ─────────────────────────────────────
    let state = AppState::new(
        Arc::clone(&config),
        Arc::new(dispatcher.clone()),
        pools.iter().map(PoolHandle::subscribe).collect(),
    );
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind {}: {}", addr, e)))?;

    tracing::info!("JobHub server listening on {}", addr);

    // ── Step 4: Graceful shutdown ────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, starting graceful shutdown...");
        let _ = shutdown_tx.send(true);
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(|e| AppError::internal(format!("Server error: {}", e)))?;

    // ── Step 5: Close worker pools ───────────────────────────────
    tracing::info!("Closing {} worker pools...", pools.len());
    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);
    let closing = join_all(pools.into_iter().map(PoolHandle::shutdown));
    if tokio::time::timeout(grace, closing).await.is_err() {
        tracing::warn!("Worker pools did not close within {:?}", grace);
    }

    let stats = dispatcher.stats();
    tracing::info!(
        "JobHub server shut down gracefully ({} jobs still in flight)",
        stats.in_flight
    );
    Ok(())
}

/// Ping each pool's first queue once so startup logs show a live round trip.
fn spawn_startup_pings(dispatcher: &Dispatcher<StudioJob>, config: &AppConfig) {
    for pool in &config.worker.pools {
        let Some(queue) = pool.queues.first().cloned() else {
            continue;
        };
        let name = pool.name.clone();
        let job = StudioJob::Ping {
            message: format!("startup:{}", name),
        };
        match dispatcher.submit_for_result::<Value>(&queue, job) {
            Ok(handle) => {
                tokio::spawn(async move {
                    match handle.wait().await {
                        Ok(reply) => tracing::info!("Pool '{}' answered ping: {}", name, reply),
                        Err(e) => tracing::warn!("Pool '{}' startup ping failed: {}", name, e),
                    }
                });
            }
            Err(e) => tracing::warn!("Could not ping pool '{}': {}", name, e),
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
