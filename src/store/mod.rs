//! Claim store: the persistence contract for job dispatch
//!
//! # Overview
//!
//! The `JobStore` trait is the sole owner of persistence interactions. One
//! typed method per family keeps each family's SQL independently checkable;
//! the dispatcher matches exhaustively over families rather than going
//! through a generic job shape.
//!
//! # Atomicity contract
//!
//! Implementations must ensure that:
//!
//! - Claims are single conditional updates whose pending predicate is part of
//!   the WHERE clause, so at most one contender wins a row.
//! - Releases increment `attempts` and escalate to the terminal-failure value
//!   in the same statement when attempts are exhausted.
//! - Stuck resets are atomic per row; concurrent sweepers never double-release.
//!
//! The candidate selectors (`next_pending_*`) are read-only and advisory; a
//! candidate is only owned after the matching `claim_*` call returns it.

use crate::error::StoreResult;
use crate::jobs::{
    ExtractionJob, JobFamily, OcrMode, PersonalFailure, PersonalRightsJob, QueueStats,
    RegistryScrapeJob, ReleaseOutcome, WorkerHeartbeat,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

pub mod postgres;

pub use postgres::PgStore;

/// Persistence operations for one backend
#[async_trait]
pub trait JobStore: Send + Sync {
    // --- extraction, primary lifecycle ---

    /// Oldest pending extraction row, if any. Advisory only.
    async fn next_pending_extraction(&self) -> StoreResult<Option<ExtractionJob>>;

    /// Conditionally transition a pending row to processing for `worker_id`.
    /// Returns `None` when another worker won the race.
    async fn claim_extraction(
        &self,
        job_id: Uuid,
        worker_id: &str,
    ) -> StoreResult<Option<ExtractionJob>>;

    /// Terminal success: artifact stored, row becomes claimable by OCR.
    async fn complete_extraction(&self, job_id: Uuid, supabase_path: &str) -> StoreResult<()>;

    /// Terminal failure with the executor's message.
    async fn fail_extraction(&self, job_id: Uuid, message: &str) -> StoreResult<()>;

    /// Return an in-progress row to pending, incrementing `attempts`;
    /// escalates to terminal failure when attempts are exhausted.
    async fn release_extraction(&self, job_id: Uuid, message: &str)
        -> StoreResult<ReleaseOutcome>;

    /// Reset in-progress rows older than `older_than` back to pending.
    /// Does not touch `attempts`.
    async fn reset_stuck_extractions(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<Uuid>>;

    // --- registry scrape ---

    async fn next_pending_registry(&self) -> StoreResult<Option<RegistryScrapeJob>>;

    async fn claim_registry(
        &self,
        job_id: Uuid,
        worker_id: &str,
    ) -> StoreResult<Option<RegistryScrapeJob>>;

    /// Terminal success: ready for name selection, `req_completed` set.
    async fn complete_registry(&self, job_id: Uuid) -> StoreResult<()>;

    /// Terminal failure. Registry scrapes are terminal on first failure.
    async fn fail_registry(&self, job_id: Uuid, message: &str) -> StoreResult<()>;

    async fn reset_stuck_registry(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<Uuid>>;

    // --- personal rights ---

    async fn next_pending_personal(&self) -> StoreResult<Option<PersonalRightsJob>>;

    async fn claim_personal(
        &self,
        job_id: Uuid,
        worker_id: &str,
    ) -> StoreResult<Option<PersonalRightsJob>>;

    async fn complete_personal(&self, job_id: Uuid, storage_path: &str) -> StoreResult<()>;

    async fn fail_personal(
        &self,
        job_id: Uuid,
        failure: PersonalFailure,
        message: &str,
    ) -> StoreResult<()>;

    async fn reset_stuck_personal(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<Uuid>>;

    /// Flip the parent session to completed when every sibling search is
    /// terminal. Returns whether the session was flipped by this call.
    async fn complete_session_if_done(&self, session_id: Uuid) -> StoreResult<bool>;

    // --- extraction, OCR sub-lifecycle ---

    /// Pending OCR rows for `mode`: artifact stored, attempts remaining.
    async fn count_ocr_backlog(&self, mode: OcrMode) -> StoreResult<i64>;

    async fn next_ocr_candidate(&self, mode: OcrMode) -> StoreResult<Option<ExtractionJob>>;

    /// Claim a completed row for OCR; predicated on the primary status being
    /// complete and `document_source` matching `mode`.
    async fn claim_ocr(
        &self,
        job_id: Uuid,
        worker_id: &str,
        mode: OcrMode,
    ) -> StoreResult<Option<ExtractionJob>>;

    async fn complete_ocr(
        &self,
        job_id: Uuid,
        raw_text: &str,
        boosted_text: &str,
    ) -> StoreResult<()>;

    /// Return an OCR-claimed row to the OCR queue, incrementing
    /// `ocr_attempts`; escalates to terminal failure on exhaustion.
    async fn release_ocr(&self, job_id: Uuid, message: &str) -> StoreResult<ReleaseOutcome>;

    async fn reset_stuck_ocr(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<Uuid>>;

    // --- worker liveness ---

    /// Upsert the worker's status row. The owning worker is the sole writer.
    async fn upsert_heartbeat(&self, heartbeat: &WorkerHeartbeat) -> StoreResult<()>;

    /// Flip workers with stale heartbeats offline and release any jobs they
    /// still own on this backend. Returns the worker ids flipped.
    async fn mark_dead_workers(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<String>>;

    // --- observability ---

    async fn queue_stats(&self, family: JobFamily) -> StoreResult<QueueStats>;
}

/// Remembers which operations hit a missing-schema error on a backend.
///
/// Per the degradation policy, a schema error disables that operation on that
/// backend for the remainder of the process lifetime and is logged exactly
/// once, at debug level.
#[derive(Debug, Default)]
pub struct SchemaGate {
    tripped: Mutex<HashSet<&'static str>>,
}

impl SchemaGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a schema failure for `operation`. Returns `true` the first time
    /// (callers log on `true`).
    pub fn trip(&self, operation: &'static str) -> bool {
        self.tripped
            .lock()
            .expect("schema gate lock poisoned")
            .insert(operation)
    }

    pub fn is_tripped(&self, operation: &'static str) -> bool {
        self.tripped
            .lock()
            .expect("schema gate lock poisoned")
            .contains(operation)
    }
}

/// Backoff schedule for transient store errors
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub max_attempts: u32,
    /// Upper bound on the random jitter added to each delay
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(30),
            max_attempts: 5,
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Base delay before retry number `attempt` (1-based), before jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.initial.saturating_mul(self.factor.saturating_pow(exp));
        delay.min(self.cap)
    }

    /// Delay with jitter applied, ready to sleep on
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        use rand::Rng;
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        self.delay_for(attempt) + Duration::from_millis(extra)
    }
}
