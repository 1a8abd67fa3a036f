//! Stuck-job recovery
//!
//! One sweeper task per process. On a fixed cadence it returns orphaned
//! in-progress rows to their queues (without touching attempt counters) and
//! flips workers with stale heartbeats offline, releasing any jobs they still
//! own. The sweeper is idempotent and safe to run from several processes at
//! once: every reset is a conditional update, so concurrent sweepers cannot
//! double-release a row.
//!
//! A relaxed one-shot sweep runs before the dispatchers start, so a worker
//! restarting after a crash recovers its own orphans instead of idling.

use crate::backend::{Backend, BackendSet};
use crate::config::Timeouts;
use crate::error::{StoreError, StoreResult};
use crate::jobs::JobFamily;
use crate::shutdown::ShutdownListener;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Per-family staleness thresholds for one sweep pass
#[derive(Debug, Clone, Copy)]
struct SweepThresholds {
    extraction: Duration,
    ocr: Duration,
    scrape: Duration,
}

/// Periodic recovery task
pub struct StuckJobSweeper {
    backends: Arc<BackendSet>,
    timeouts: Timeouts,
}

impl StuckJobSweeper {
    pub fn new(backends: Arc<BackendSet>, timeouts: Timeouts) -> Self {
        Self { backends, timeouts }
    }

    /// Steady-state loop
    pub async fn run(&self, mut shutdown: ShutdownListener) {
        let mut ticker = tokio::time::interval(self.timeouts.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let thresholds = SweepThresholds {
            extraction: self.timeouts.stuck_extraction_threshold,
            ocr: self.timeouts.stuck_ocr_threshold,
            scrape: self.timeouts.stuck_scrape_threshold,
        };

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep(thresholds).await;
                    self.reap_dead_workers().await;
                    self.log_queue_depths().await;
                }
                _ = shutdown.cancelled() => break,
            }
        }
    }

    /// One-shot pass with the relaxed threshold, run before dispatch starts
    pub async fn startup_sweep(&self) {
        let relaxed = self.timeouts.startup_sweep_threshold;
        info!(threshold_secs = relaxed.as_secs(), "running startup recovery sweep");
        self.sweep(SweepThresholds {
            extraction: relaxed,
            ocr: relaxed,
            scrape: relaxed,
        })
        .await;
        self.reap_dead_workers().await;
    }

    async fn sweep(&self, thresholds: SweepThresholds) {
        let now = Utc::now();
        for backend in self.backends.available() {
            let extraction_cutoff = now - to_chrono(thresholds.extraction);
            let scrape_cutoff = now - to_chrono(thresholds.scrape);

            if let Some(ids) = self
                .guarded(backend, "reset_stuck_extractions", async {
                    backend.store().reset_stuck_extractions(extraction_cutoff).await
                })
                .await
            {
                if !ids.is_empty() {
                    info!(
                        backend = %backend.name(),
                        count = ids.len(),
                        "recovered stuck extraction jobs"
                    );
                }
            }

            if backend.ocr_enabled() {
                let ocr_cutoff = now - to_chrono(thresholds.ocr);
                if let Some(ids) = self
                    .guarded(backend, "reset_stuck_ocr", async {
                        backend.store().reset_stuck_ocr(ocr_cutoff).await
                    })
                    .await
                {
                    if !ids.is_empty() {
                        info!(
                            backend = %backend.name(),
                            count = ids.len(),
                            "recovered stuck ocr jobs"
                        );
                    }
                }
            }

            if let Some(ids) = self
                .guarded(backend, "reset_stuck_registry", async {
                    backend.store().reset_stuck_registry(scrape_cutoff).await
                })
                .await
            {
                if !ids.is_empty() {
                    info!(
                        backend = %backend.name(),
                        count = ids.len(),
                        "recovered stuck registry scrapes"
                    );
                }
            }

            if let Some(ids) = self
                .guarded(backend, "reset_stuck_personal", async {
                    backend.store().reset_stuck_personal(scrape_cutoff).await
                })
                .await
            {
                if !ids.is_empty() {
                    info!(
                        backend = %backend.name(),
                        count = ids.len(),
                        "recovered stuck personal-rights searches"
                    );
                }
            }
        }
    }

    async fn reap_dead_workers(&self) {
        let cutoff = Utc::now() - to_chrono(self.timeouts.dead_worker_threshold);
        for backend in self.backends.available() {
            if let Some(workers) = self
                .guarded(backend, "mark_dead_workers", async {
                    backend.store().mark_dead_workers(cutoff).await
                })
                .await
            {
                for worker in &workers {
                    warn!(
                        backend = %backend.name(),
                        worker_id = %worker,
                        "stale worker marked offline; its jobs were released"
                    );
                }
            }
        }
    }

    async fn log_queue_depths(&self) {
        for backend in self.backends.available() {
            for family in JobFamily::PRIORITY {
                if let Some(stats) = self
                    .guarded(backend, "queue_stats", async {
                        backend.store().queue_stats(family).await
                    })
                    .await
                {
                    debug!(
                        backend = %backend.name(),
                        family = %family,
                        pending = stats.pending,
                        processing = stats.processing,
                        failed = stats.failed,
                        oldest_pending_secs = stats.oldest_pending_secs.unwrap_or(0),
                        "queue depth"
                    );
                }
            }
        }
    }

    /// Run a store call under the schema gate.
    ///
    /// Schema errors trip the gate for this (backend, operation) pair and are
    /// logged once at debug; anything else is logged and swallowed so one bad
    /// backend never stalls the sweep.
    async fn guarded<T>(
        &self,
        backend: &Backend,
        operation: &'static str,
        fut: impl std::future::Future<Output = StoreResult<T>>,
    ) -> Option<T> {
        if backend.schema_gate().is_tripped(operation) {
            return None;
        }
        match fut.await {
            Ok(value) => Some(value),
            Err(StoreError::Schema(message)) => {
                if backend.schema_gate().trip(operation) {
                    debug!(
                        backend = %backend.name(),
                        operation,
                        message,
                        "backend schema is missing pieces; operation disabled for this process"
                    );
                }
                None
            }
            Err(e) => {
                warn!(backend = %backend.name(), operation, error = %e, "sweep operation failed");
                None
            }
        }
    }
}

fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::days(365_000))
}
