//! Worker-process bootstrap and lifecycle
//!
//! `WorkerPool::start` wires the whole process in a fixed order: recovery
//! sweep first (so a restart after a crash reclaims its own orphans), then
//! heartbeat registrars, the steady-state sweeper, the dispatchers, and
//! finally the OCR pool when at least one backend allows OCR. Shutdown is a
//! single broadcast: dispatchers stop claiming, in-flight work gets a bounded
//! grace period, and the registrars write `stopped` on their way out.

use crate::backend::BackendSet;
use crate::config::WorkerConfig;
use crate::dispatcher::Dispatcher;
use crate::engines::Engines;
use crate::heartbeat::HeartbeatRegistrar;
use crate::jobs::worker_id;
use crate::ocr::OcrPoolManager;
use crate::shutdown::Shutdown;
use crate::sweeper::StuckJobSweeper;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Pool start-up options
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// Dispatchers exit once a full scan finds no work (drain scripts, tests)
    pub run_once: bool,
}

/// A running worker process: dispatchers, sweeper, registrars, OCR pool
pub struct WorkerPool {
    shutdown: Shutdown,
    dispatch_tasks: Vec<JoinHandle<()>>,
    service_tasks: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start every task of a worker process.
    ///
    /// The startup recovery sweep completes before any dispatcher can claim.
    pub async fn start(
        config: &WorkerConfig,
        backends: Arc<BackendSet>,
        engines: Engines,
        options: RuntimeOptions,
    ) -> Self {
        let shutdown = Shutdown::new();
        let timeouts = config.timeouts.clone();

        info!(
            backends = ?backends,
            worker_count = config.worker_count,
            ocr_pool_size = config.ocr.pool_size,
            extraction_timeout_secs = timeouts.extraction.as_secs(),
            "starting worker pool"
        );
        if backends.is_empty() {
            warn!("no backends configured; dispatchers will idle");
        }

        let sweeper = Arc::new(StuckJobSweeper::new(backends.clone(), timeouts.clone()));
        if !backends.is_empty() {
            sweeper.startup_sweep().await;
        }

        let mut service_tasks = Vec::new();
        let mut dispatch_tasks = Vec::new();

        // Heartbeat registrars, one per dispatcher, all on the designated
        // backend. Liveness is process-global, not per-backend.
        let mut registrars = Vec::with_capacity(config.worker_count);
        for _ in 0..config.worker_count {
            let id = worker_id("worker");
            let registrar = match backends.designated() {
                Some(designated) => {
                    let registrar = Arc::new(HeartbeatRegistrar::new(
                        designated.clone(),
                        id.clone(),
                        timeouts.heartbeat_interval,
                    ));
                    if let Err(e) = registrar.register().await {
                        warn!(worker_id = %id, error = %e, "worker registration failed");
                    }
                    let task = registrar.clone();
                    let listener = shutdown.listener();
                    service_tasks.push(tokio::spawn(async move { task.run(listener).await }));
                    Some(registrar)
                }
                None => None,
            };
            registrars.push((id, registrar));
        }

        {
            let sweeper = sweeper.clone();
            let listener = shutdown.listener();
            service_tasks.push(tokio::spawn(async move { sweeper.run(listener).await }));
        }

        for (id, registrar) in registrars {
            let mut dispatcher = Dispatcher::new(
                backends.clone(),
                engines.clone(),
                registrar,
                id,
                timeouts.clone(),
            );
            if options.run_once {
                dispatcher = dispatcher.run_once();
            }
            let listener = shutdown.listener();
            dispatch_tasks.push(tokio::spawn(async move { dispatcher.run(listener).await }));
        }

        if config.ocr.pool_size > 0 && backends.ocr_backends().next().is_some() {
            let pool = OcrPoolManager::new(
                backends.clone(),
                engines.ocr.clone(),
                config.ocr,
                timeouts.clone(),
            );
            let listener = shutdown.listener();
            service_tasks.push(tokio::spawn(async move { pool.run(listener).await }));
        } else {
            info!("ocr pool disabled: no ocr-enabled backend or zero pool size");
        }

        Self {
            shutdown,
            dispatch_tasks,
            service_tasks,
        }
    }

    /// Handle for triggering shutdown from outside the pool
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Wait for the dispatchers to finish, then drain the service tasks.
    ///
    /// In `run_once` mode the dispatchers finish on their own once idle; in
    /// steady state they finish only after shutdown has been triggered.
    pub async fn join(self) {
        futures::future::join_all(self.dispatch_tasks).await;
        self.shutdown.trigger();
        futures::future::join_all(self.service_tasks).await;
    }

    /// Trigger shutdown and wait for every task to drain
    pub async fn shutdown_and_join(self) {
        self.shutdown.trigger();
        self.join().await;
    }

    /// Run until SIGTERM/SIGINT, then drain and return
    pub async fn run_until_signalled(self) -> anyhow::Result<()> {
        wait_for_signal().await?;
        info!("shutdown signal received; draining worker pool");
        self.shutdown_and_join().await;
        info!("worker pool drained");
        Ok(())
    }
}

async fn wait_for_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
