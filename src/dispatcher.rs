//! Per-worker dispatch loop
//!
//! Each dispatcher scans every backend in priority order and, within a
//! backend, every family in priority order (extraction first). The first
//! claimable job wins; after executing it the scan restarts from the top so a
//! newly-arrived high-priority job in the primary backend pre-empts further
//! sweeps of lower-priority queues. Losing a claim race is not an error; the
//! scan just moves on.
//!
//! Correctness under contention rests entirely on the store's conditional
//! claims. Dispatchers sharing a process never coordinate in memory.

use crate::backend::{Backend, BackendSet};
use crate::config::Timeouts;
use crate::engines::{Engines, ExtractionError, ScraperError};
use crate::error::{truncate_error_message, StoreResult};
use crate::heartbeat::HeartbeatRegistrar;
use crate::jobs::{
    ExtractionJob, JobFamily, PersonalFailure, PersonalRightsJob, RegistryScrapeJob,
    ReleaseOutcome,
};
use crate::shutdown::ShutdownListener;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of one full scan over backends and families
enum ScanOutcome {
    /// A job was claimed and executed
    Processed,
    /// No backend had claimable work
    Idle,
    /// Shutdown observed mid-scan
    ShuttingDown,
}

/// Outcome of running an executor under its deadline
pub(crate) enum ExecOutcome<T> {
    Finished(T),
    DeadlineElapsed,
    /// Shutdown arrived and the grace period ran out; the job stays
    /// in-progress for the sweeper.
    Cancelled,
}

/// Run `fut` with a hard deadline, honoring shutdown.
///
/// On shutdown the future gets up to `grace` to finish before being dropped.
pub(crate) async fn with_deadline<T>(
    limit: Duration,
    grace: Duration,
    shutdown: &mut ShutdownListener,
    fut: impl Future<Output = T>,
) -> ExecOutcome<T> {
    tokio::pin!(fut);
    tokio::select! {
        out = &mut fut => ExecOutcome::Finished(out),
        _ = tokio::time::sleep(limit) => ExecOutcome::DeadlineElapsed,
        _ = shutdown.cancelled() => {
            match tokio::time::timeout(grace, &mut fut).await {
                Ok(out) => ExecOutcome::Finished(out),
                Err(_) => ExecOutcome::Cancelled,
            }
        }
    }
}

/// Sleep that wakes early on shutdown
pub(crate) async fn idle_sleep(duration: Duration, shutdown: &mut ShutdownListener) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = shutdown.cancelled() => {}
    }
}

/// Sliding-window counter for uncaught dispatcher-scope errors
pub(crate) struct ErrorRateGuard {
    limit: usize,
    window: Duration,
    events: VecDeque<Instant>,
}

impl ErrorRateGuard {
    pub(crate) fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            events: VecDeque::new(),
        }
    }

    /// Record one error; returns true once the rate exceeds the limit
    pub(crate) fn record(&mut self) -> bool {
        let now = Instant::now();
        self.events.push_back(now);
        while let Some(front) = self.events.front() {
            if now.duration_since(*front) > self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
        self.events.len() > self.limit
    }
}

/// One worker's dispatch task
pub struct Dispatcher {
    backends: Arc<BackendSet>,
    engines: Engines,
    heartbeat: Option<Arc<HeartbeatRegistrar>>,
    worker_id: String,
    timeouts: Timeouts,
    run_once: bool,
}

impl Dispatcher {
    pub fn new(
        backends: Arc<BackendSet>,
        engines: Engines,
        heartbeat: Option<Arc<HeartbeatRegistrar>>,
        worker_id: String,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            backends,
            engines,
            heartbeat,
            worker_id,
            timeouts,
            run_once: false,
        }
    }

    /// Exit once a full scan finds no work anywhere (tests, drain scripts)
    pub fn run_once(mut self) -> Self {
        self.run_once = true;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Main loop; runs until shutdown or, with `run_once`, until idle
    pub async fn run(&self, mut shutdown: ShutdownListener) {
        info!(worker_id = %self.worker_id, "dispatcher started");
        let mut guard = ErrorRateGuard::new(10, Duration::from_secs(60));

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.poll_once(&mut shutdown).await {
                // Greedy restart: rescan from the highest priority
                Ok(ScanOutcome::Processed) => continue,
                Ok(ScanOutcome::Idle) => {
                    if self.run_once {
                        break;
                    }
                    idle_sleep(self.timeouts.poll_idle_sleep, &mut shutdown).await;
                }
                Ok(ScanOutcome::ShuttingDown) => break,
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = %e, "dispatcher scan failed");
                    if guard.record() {
                        error!(
                            worker_id = %self.worker_id,
                            "error rate exceeded; dispatcher exiting for supervised restart"
                        );
                        break;
                    }
                    idle_sleep(Duration::from_secs(1), &mut shutdown).await;
                }
            }
        }
        info!(worker_id = %self.worker_id, "dispatcher stopped");
    }

    /// One scan over every (backend, family) pair in priority order
    async fn poll_once(&self, shutdown: &mut ShutdownListener) -> StoreResult<ScanOutcome> {
        for backend in self.backends.available() {
            for family in JobFamily::PRIORITY {
                if shutdown.is_cancelled() {
                    return Ok(ScanOutcome::ShuttingDown);
                }
                if backend.schema_gate().is_tripped(family.as_str()) {
                    continue;
                }
                let processed = match family {
                    JobFamily::Extraction => self.try_extraction(backend, shutdown).await,
                    JobFamily::RegistryScrape => self.try_registry(backend, shutdown).await,
                    JobFamily::PersonalRights => self.try_personal(backend, shutdown).await,
                };
                match processed {
                    Ok(true) => return Ok(ScanOutcome::Processed),
                    Ok(false) => continue,
                    Err(e) if e.is_schema() => {
                        if backend.schema_gate().trip(family.as_str()) {
                            debug!(
                                backend = %backend.name(),
                                family = %family,
                                error = %e,
                                "backend schema is missing pieces; family disabled for this process"
                            );
                        }
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(ScanOutcome::Idle)
    }

    async fn try_extraction(
        &self,
        backend: &Backend,
        shutdown: &mut ShutdownListener,
    ) -> StoreResult<bool> {
        let Some(candidate) = backend.store().next_pending_extraction().await? else {
            return Ok(false);
        };
        let Some(job) = backend
            .store()
            .claim_extraction(candidate.id, &self.worker_id)
            .await?
        else {
            // Lost the race; the scan falls through to the next family.
            return Ok(false);
        };
        self.execute_extraction(backend, job, shutdown).await?;
        Ok(true)
    }

    async fn execute_extraction(
        &self,
        backend: &Backend,
        job: ExtractionJob,
        shutdown: &mut ShutdownListener,
    ) -> StoreResult<()> {
        let store = backend.store();
        info!(
            worker_id = %self.worker_id,
            backend = %backend.name(),
            job_id = %job.id,
            document_number = job.document_number.as_deref().unwrap_or(""),
            attempts = job.attempts,
            "processing extraction job"
        );

        let lease = match self.engines.vault.acquire().await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "credential lease unavailable; releasing job");
                let outcome = store.release_extraction(job.id, &e.to_string()).await?;
                self.log_release(backend, job.id, outcome);
                return Ok(());
            }
        };

        self.job_started(job.id, lease.account_id).await;

        let outcome = with_deadline(
            self.timeouts.extraction,
            self.timeouts.shutdown_grace,
            shutdown,
            self.engines.extraction.run(&job, &lease),
        )
        .await;

        let result: StoreResult<Option<bool>> = match outcome {
            ExecOutcome::Finished(Ok(output)) => {
                let path = output.artifact.object_path();
                match store.complete_extraction(job.id, &path).await {
                    Ok(()) => {
                        info!(job_id = %job.id, supabase_path = %path, "extraction complete");
                        Ok(Some(true))
                    }
                    Err(e) => Err(e),
                }
            }
            ExecOutcome::Finished(Err(ExtractionError::NotFound(message))) => {
                let message = truncate_error_message(&message);
                match store.fail_extraction(job.id, &message).await {
                    Ok(()) => {
                        info!(job_id = %job.id, message, "document not found; job failed terminally");
                        Ok(Some(false))
                    }
                    Err(e) => Err(e),
                }
            }
            ExecOutcome::Finished(Err(err)) => {
                let message = match &err {
                    ExtractionError::Timeout => "timeout".to_string(),
                    other => truncate_error_message(&other.to_string()),
                };
                match store.release_extraction(job.id, &message).await {
                    Ok(release) => {
                        self.log_release(backend, job.id, release);
                        Ok(Some(false))
                    }
                    Err(e) => Err(e),
                }
            }
            ExecOutcome::DeadlineElapsed => {
                match store.release_extraction(job.id, "timeout").await {
                    Ok(release) => {
                        warn!(job_id = %job.id, "extraction deadline elapsed");
                        self.log_release(backend, job.id, release);
                        Ok(Some(false))
                    }
                    Err(e) => Err(e),
                }
            }
            ExecOutcome::Cancelled => {
                info!(job_id = %job.id, "shutdown during extraction; leaving job for the sweeper");
                Ok(None)
            }
        };

        self.engines.vault.release(lease).await;

        match result {
            Ok(Some(success)) => {
                self.job_finished(success).await;
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn try_registry(
        &self,
        backend: &Backend,
        shutdown: &mut ShutdownListener,
    ) -> StoreResult<bool> {
        let Some(candidate) = backend.store().next_pending_registry().await? else {
            return Ok(false);
        };
        let Some(job) = backend
            .store()
            .claim_registry(candidate.id, &self.worker_id)
            .await?
        else {
            return Ok(false);
        };
        self.execute_registry(backend, job, shutdown).await?;
        Ok(true)
    }

    async fn execute_registry(
        &self,
        backend: &Backend,
        job: RegistryScrapeJob,
        shutdown: &mut ShutdownListener,
    ) -> StoreResult<()> {
        let store = backend.store();
        info!(
            worker_id = %self.worker_id,
            backend = %backend.name(),
            job_id = %job.id,
            query = job.initial_search_query.as_deref().unwrap_or(""),
            "processing registry scrape"
        );
        self.job_started(job.id, None).await;

        let outcome = with_deadline(
            self.timeouts.extraction,
            self.timeouts.shutdown_grace,
            shutdown,
            self.engines.registry.run(&job),
        )
        .await;

        // Registry scrapes are terminal on first failure: a failed scrape is
        // a permanent data issue on the third-party registry, not a fault
        // worth retrying.
        match outcome {
            ExecOutcome::Finished(Ok(())) => {
                store.complete_registry(job.id).await?;
                info!(job_id = %job.id, "registry scrape complete; ready for name selection");
                self.job_finished(true).await;
            }
            ExecOutcome::Finished(Err(err)) => {
                let message = truncate_error_message(&err.to_string());
                store.fail_registry(job.id, &message).await?;
                warn!(job_id = %job.id, message, "registry scrape failed terminally");
                self.job_finished(false).await;
            }
            ExecOutcome::DeadlineElapsed => {
                store.fail_registry(job.id, "timeout").await?;
                warn!(job_id = %job.id, "registry scrape deadline elapsed; failed terminally");
                self.job_finished(false).await;
            }
            ExecOutcome::Cancelled => {
                info!(job_id = %job.id, "shutdown during registry scrape; leaving job for the sweeper");
            }
        }
        Ok(())
    }

    async fn try_personal(
        &self,
        backend: &Backend,
        shutdown: &mut ShutdownListener,
    ) -> StoreResult<bool> {
        let Some(candidate) = backend.store().next_pending_personal().await? else {
            return Ok(false);
        };
        let Some(job) = backend
            .store()
            .claim_personal(candidate.id, &self.worker_id)
            .await?
        else {
            return Ok(false);
        };
        self.execute_personal(backend, job, shutdown).await?;
        Ok(true)
    }

    async fn execute_personal(
        &self,
        backend: &Backend,
        job: PersonalRightsJob,
        shutdown: &mut ShutdownListener,
    ) -> StoreResult<()> {
        let store = backend.store();
        info!(
            worker_id = %self.worker_id,
            backend = %backend.name(),
            job_id = %job.id,
            search_name = job.search_name.as_deref().unwrap_or(""),
            "processing personal-rights search"
        );
        self.job_started(job.id, None).await;

        let outcome = with_deadline(
            self.timeouts.extraction,
            self.timeouts.shutdown_grace,
            shutdown,
            self.engines.personal.run(&job),
        )
        .await;

        let terminal = match outcome {
            ExecOutcome::Finished(Ok(artifact)) => {
                let path = artifact.object_path();
                store.complete_personal(job.id, &path).await?;
                info!(job_id = %job.id, storage_path = %path, "personal-rights search complete");
                self.job_finished(true).await;
                true
            }
            ExecOutcome::Finished(Err(ScraperError::CompanyNotFound(message))) => {
                let message = truncate_error_message(&message);
                store
                    .fail_personal(job.id, PersonalFailure::NotFound, &message)
                    .await?;
                info!(job_id = %job.id, message, "company not found");
                self.job_finished(false).await;
                true
            }
            ExecOutcome::Finished(Err(err)) => {
                let message = truncate_error_message(&err.to_string());
                store
                    .fail_personal(job.id, PersonalFailure::Failed, &message)
                    .await?;
                warn!(job_id = %job.id, message, "personal-rights search failed");
                self.job_finished(false).await;
                true
            }
            ExecOutcome::DeadlineElapsed => {
                store
                    .fail_personal(job.id, PersonalFailure::Failed, "timeout")
                    .await?;
                warn!(job_id = %job.id, "personal-rights search deadline elapsed");
                self.job_finished(false).await;
                true
            }
            ExecOutcome::Cancelled => {
                info!(job_id = %job.id, "shutdown during personal-rights search; leaving job for the sweeper");
                false
            }
        };

        // Once every sibling search is terminal the parent session flips to
        // completed. Best effort with no retry.
        if terminal {
            match store.complete_session_if_done(job.search_session_id).await {
                Ok(true) => {
                    info!(session_id = %job.search_session_id, "search session completed");
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        session_id = %job.search_session_id,
                        error = %e,
                        "session completion check failed"
                    );
                }
            }
        }
        Ok(())
    }

    fn log_release(&self, backend: &Backend, job_id: Uuid, outcome: ReleaseOutcome) {
        match outcome {
            ReleaseOutcome::Requeued { attempts } => {
                debug!(
                    backend = %backend.name(),
                    job_id = %job_id,
                    attempts,
                    "job released back to pending"
                );
            }
            ReleaseOutcome::Exhausted => {
                warn!(
                    backend = %backend.name(),
                    job_id = %job_id,
                    "job attempts exhausted; failed terminally"
                );
            }
            ReleaseOutcome::NotInProgress => {
                debug!(
                    backend = %backend.name(),
                    job_id = %job_id,
                    "release found job no longer in progress"
                );
            }
        }
    }

    async fn job_started(&self, job_id: Uuid, account_id: Option<Uuid>) {
        if let Some(hb) = &self.heartbeat {
            hb.job_started(job_id, account_id).await;
        }
    }

    async fn job_finished(&self, success: bool) {
        if let Some(hb) = &self.heartbeat {
            hb.job_finished(success).await;
        }
    }
}
