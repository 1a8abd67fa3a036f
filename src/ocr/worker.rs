//! OCR worker loop
//!
//! Same shape as the primary dispatcher, restricted to the extraction rows'
//! OCR sub-lifecycle: claim a completed row matching the worker's current
//! mode, run the OCR engine under its deadline, then either store the text or
//! release the row with an incremented attempt count.

use crate::backend::{Backend, BackendSet};
use crate::config::Timeouts;
use crate::dispatcher::{idle_sleep, with_deadline, ExecOutcome};
use crate::engines::OcrEngine;
use crate::error::{truncate_error_message, StoreError};
use crate::jobs::{worker_id, ExtractionJob, OcrMode, ReleaseOutcome};
use crate::shutdown::ShutdownListener;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

enum OcrScan {
    Processed,
    Idle,
    ShuttingDown,
}

/// One mode-typed OCR worker
pub struct OcrWorker {
    worker_id: String,
    backends: Arc<BackendSet>,
    engine: Arc<dyn OcrEngine>,
    timeouts: Timeouts,
}

impl OcrWorker {
    pub fn new(backends: Arc<BackendSet>, engine: Arc<dyn OcrEngine>, timeouts: Timeouts) -> Self {
        Self {
            worker_id: worker_id("ocr"),
            backends,
            engine,
            timeouts,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claim-execute loop; re-reads the desired mode at every job boundary
    pub async fn run(&self, mode_rx: watch::Receiver<OcrMode>, mut shutdown: ShutdownListener) {
        info!(worker_id = %self.worker_id, mode = %*mode_rx.borrow(), "ocr worker started");
        let mut active_mode = *mode_rx.borrow();

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let desired = *mode_rx.borrow();
            if desired != active_mode {
                info!(
                    worker_id = %self.worker_id,
                    from = %active_mode,
                    to = %desired,
                    "ocr worker drained; switching mode"
                );
                active_mode = desired;
            }

            match self.poll_once(active_mode, &mut shutdown).await {
                OcrScan::Processed => continue,
                OcrScan::Idle => {
                    idle_sleep(self.timeouts.poll_idle_sleep, &mut shutdown).await;
                }
                OcrScan::ShuttingDown => break,
            }
        }
        info!(worker_id = %self.worker_id, "ocr worker stopped");
    }

    async fn poll_once(&self, mode: OcrMode, shutdown: &mut ShutdownListener) -> OcrScan {
        for backend in self.backends.available() {
            if !backend.ocr_enabled() || backend.schema_gate().is_tripped("ocr") {
                continue;
            }
            if shutdown.is_cancelled() {
                return OcrScan::ShuttingDown;
            }

            let candidate = match backend.store().next_ocr_candidate(mode).await {
                Ok(Some(candidate)) => candidate,
                Ok(None) => continue,
                Err(e) => {
                    self.handle_scan_error(backend, e);
                    continue;
                }
            };

            let claimed = match backend
                .store()
                .claim_ocr(candidate.id, &self.worker_id, mode)
                .await
            {
                Ok(Some(job)) => job,
                // Lost the race to a peer; move on
                Ok(None) => continue,
                Err(e) => {
                    self.handle_scan_error(backend, e);
                    continue;
                }
            };

            self.execute(backend, claimed, shutdown).await;
            return OcrScan::Processed;
        }
        OcrScan::Idle
    }

    async fn execute(&self, backend: &Backend, job: ExtractionJob, shutdown: &mut ShutdownListener) {
        let store = backend.store();

        let Some(pdf_path) = job.supabase_path.clone() else {
            self.release(backend, job.id, "artifact path missing on completed row")
                .await;
            return;
        };
        let Some(source) = job.source() else {
            self.release(backend, job.id, "unrecognized document source")
                .await;
            return;
        };

        info!(
            worker_id = %self.worker_id,
            backend = %backend.name(),
            job_id = %job.id,
            pdf_path = %pdf_path,
            source = %source,
            ocr_attempts = job.ocr_attempts,
            "processing ocr job"
        );

        let outcome = with_deadline(
            self.timeouts.ocr,
            self.timeouts.shutdown_grace,
            shutdown,
            self.engine.run(&pdf_path, source),
        )
        .await;

        match outcome {
            ExecOutcome::Finished(Ok(output)) => {
                match store
                    .complete_ocr(job.id, &output.raw_text, &output.boosted_text)
                    .await
                {
                    Ok(()) => info!(job_id = %job.id, "ocr complete"),
                    Err(e) => warn!(job_id = %job.id, error = %e, "failed to store ocr result"),
                }
            }
            ExecOutcome::Finished(Err(err)) => {
                self.release(backend, job.id, &truncate_error_message(&err.to_string()))
                    .await;
            }
            ExecOutcome::DeadlineElapsed => {
                warn!(job_id = %job.id, "ocr deadline elapsed");
                self.release(backend, job.id, "timeout").await;
            }
            ExecOutcome::Cancelled => {
                info!(job_id = %job.id, "shutdown during ocr; leaving job for the sweeper");
            }
        }
    }

    async fn release(&self, backend: &Backend, job_id: uuid::Uuid, message: &str) {
        match backend.store().release_ocr(job_id, message).await {
            Ok(ReleaseOutcome::Requeued { attempts }) => {
                debug!(job_id = %job_id, attempts, "ocr job released back to the queue");
            }
            Ok(ReleaseOutcome::Exhausted) => {
                warn!(job_id = %job_id, "ocr attempts exhausted; job failed terminally");
            }
            Ok(ReleaseOutcome::NotInProgress) => {
                debug!(job_id = %job_id, "ocr release found job no longer in progress");
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "ocr release failed");
            }
        }
    }

    fn handle_scan_error(&self, backend: &Backend, error: StoreError) {
        if error.is_schema() {
            if backend.schema_gate().trip("ocr") {
                debug!(
                    backend = %backend.name(),
                    error = %error,
                    "backend lacks ocr columns; treated as ocr-disabled for this process"
                );
            }
        } else {
            warn!(backend = %backend.name(), error = %error, "ocr scan failed");
        }
    }
}
