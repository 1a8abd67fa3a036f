//! Shared fixtures for the integration tests: an in-memory claim store that
//! mirrors the Postgres semantics, scripted collaborator engines, and row
//! builders.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use registre_pool::engines::{
    ArtifactRef, CredentialLease, CredentialVault, Engines, ExtractionEngine, ExtractionError,
    ExtractionOutput, NoCredentialsAvailable, OcrEngine, OcrError, OcrOutput,
    PersonalRightsScraper, RegistryScraper, ScraperError,
};
use registre_pool::error::{StoreError, StoreResult};
use registre_pool::jobs::{
    personal_status, registry_status, DocumentSource, ExtractionJob, JobFamily, OcrMode,
    PersonalFailure, PersonalRightsJob, QueueStats, RegistryScrapeJob, ReleaseOutcome,
    WorkerHeartbeat,
};
use registre_pool::store::JobStore;
use registre_pool::{Backend, BackendName, OcrPoolSettings, Timeouts, WorkerConfig};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// In-memory claim store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MemExtraction {
    job: ExtractionJob,
    file_content: Option<String>,
    boosted_file_content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MemWorkerRow {
    pub status: String,
    pub current_job_id: Option<Uuid>,
    pub last_heartbeat: DateTime<Utc>,
    pub jobs_completed: i32,
    pub jobs_failed: i32,
    pub started_at: DateTime<Utc>,
    pub account_id: Option<Uuid>,
}

#[derive(Default)]
struct Inner {
    extractions: Vec<MemExtraction>,
    registries: Vec<RegistryScrapeJob>,
    personals: Vec<PersonalRightsJob>,
    workers: HashMap<String, MemWorkerRow>,
}

/// In-memory `JobStore` with the same transition semantics as the Postgres
/// store. The single mutex linearizes claims exactly like the backend does.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// When set, every OCR-path operation reports a missing schema
    ocr_schema_missing: bool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A store whose backend was never migrated for OCR
    pub fn without_ocr_schema() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            ocr_schema_missing: true,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store lock poisoned")
    }

    fn ocr_guard(&self) -> StoreResult<()> {
        if self.ocr_schema_missing {
            Err(StoreError::Schema(
                "column \"ocr_attempts\" does not exist".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    // --- seeding ---

    pub fn insert_extraction(&self, job: ExtractionJob) {
        self.lock().extractions.push(MemExtraction {
            job,
            file_content: None,
            boosted_file_content: None,
        });
    }

    pub fn insert_registry(&self, job: RegistryScrapeJob) {
        self.lock().registries.push(job);
    }

    pub fn insert_personal(&self, job: PersonalRightsJob) {
        self.lock().personals.push(job);
    }

    pub fn insert_worker_row(&self, worker_id: &str, status: &str, last_heartbeat: DateTime<Utc>) {
        self.lock().workers.insert(
            worker_id.to_string(),
            MemWorkerRow {
                status: status.to_string(),
                current_job_id: None,
                last_heartbeat,
                jobs_completed: 0,
                jobs_failed: 0,
                started_at: last_heartbeat,
                account_id: None,
            },
        );
    }

    // --- assertions ---

    pub fn extraction(&self, id: Uuid) -> ExtractionJob {
        self.lock()
            .extractions
            .iter()
            .find(|e| e.job.id == id)
            .expect("extraction row missing")
            .job
            .clone()
    }

    pub fn extraction_text(&self, id: Uuid) -> (Option<String>, Option<String>) {
        let inner = self.lock();
        let row = inner
            .extractions
            .iter()
            .find(|e| e.job.id == id)
            .expect("extraction row missing");
        (row.file_content.clone(), row.boosted_file_content.clone())
    }

    pub fn registry(&self, id: Uuid) -> RegistryScrapeJob {
        self.lock()
            .registries
            .iter()
            .find(|r| r.id == id)
            .expect("registry row missing")
            .clone()
    }

    pub fn personal(&self, id: Uuid) -> PersonalRightsJob {
        self.lock()
            .personals
            .iter()
            .find(|p| p.id == id)
            .expect("personal row missing")
            .clone()
    }

    pub fn worker_row(&self, worker_id: &str) -> Option<MemWorkerRow> {
        self.lock().workers.get(worker_id).cloned()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn next_pending_extraction(&self) -> StoreResult<Option<ExtractionJob>> {
        let inner = self.lock();
        Ok(inner
            .extractions
            .iter()
            .filter(|e| e.job.status_id == 1 && e.job.attempts < e.job.max_attempts)
            .min_by_key(|e| e.job.created_at)
            .map(|e| e.job.clone()))
    }

    async fn claim_extraction(
        &self,
        job_id: Uuid,
        worker_id: &str,
    ) -> StoreResult<Option<ExtractionJob>> {
        let mut inner = self.lock();
        for entry in inner.extractions.iter_mut() {
            if entry.job.id == job_id && entry.job.status_id == 1 {
                entry.job.status_id = 2;
                entry.job.worker_id = Some(worker_id.to_string());
                entry.job.processing_started_at = Some(Utc::now());
                return Ok(Some(entry.job.clone()));
            }
        }
        Ok(None)
    }

    async fn complete_extraction(&self, job_id: Uuid, supabase_path: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        if let Some(entry) = inner.extractions.iter_mut().find(|e| e.job.id == job_id) {
            entry.job.status_id = 3;
            entry.job.supabase_path = Some(supabase_path.to_string());
            entry.job.error_message = None;
            entry.job.worker_id = None;
            entry.job.processing_started_at = None;
        }
        Ok(())
    }

    async fn fail_extraction(&self, job_id: Uuid, message: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        if let Some(entry) = inner.extractions.iter_mut().find(|e| e.job.id == job_id) {
            entry.job.status_id = 4;
            entry.job.error_message = Some(message.to_string());
            entry.job.worker_id = None;
            entry.job.processing_started_at = None;
        }
        Ok(())
    }

    async fn release_extraction(
        &self,
        job_id: Uuid,
        message: &str,
    ) -> StoreResult<ReleaseOutcome> {
        let mut inner = self.lock();
        let Some(entry) = inner
            .extractions
            .iter_mut()
            .find(|e| e.job.id == job_id && e.job.status_id == 2)
        else {
            return Ok(ReleaseOutcome::NotInProgress);
        };
        entry.job.attempts += 1;
        entry.job.error_message = Some(message.to_string());
        entry.job.worker_id = None;
        entry.job.processing_started_at = None;
        if entry.job.attempts >= entry.job.max_attempts {
            entry.job.status_id = 4;
            Ok(ReleaseOutcome::Exhausted)
        } else {
            entry.job.status_id = 1;
            Ok(ReleaseOutcome::Requeued {
                attempts: entry.job.attempts,
            })
        }
    }

    async fn reset_stuck_extractions(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        let mut inner = self.lock();
        let mut reset = Vec::new();
        for entry in inner.extractions.iter_mut() {
            if entry.job.status_id == 2
                && entry.job.processing_started_at.is_some_and(|t| t < older_than)
            {
                entry.job.status_id = 1;
                entry.job.worker_id = None;
                entry.job.processing_started_at = None;
                reset.push(entry.job.id);
            }
        }
        Ok(reset)
    }

    async fn next_pending_registry(&self) -> StoreResult<Option<RegistryScrapeJob>> {
        let inner = self.lock();
        Ok(inner
            .registries
            .iter()
            .filter(|r| r.status == registry_status::PENDING_COMPANY_SELECTION && !r.req_completed)
            .min_by_key(|r| r.created_at)
            .cloned())
    }

    async fn claim_registry(
        &self,
        job_id: Uuid,
        worker_id: &str,
    ) -> StoreResult<Option<RegistryScrapeJob>> {
        let mut inner = self.lock();
        for row in inner.registries.iter_mut() {
            if row.id == job_id
                && row.status == registry_status::PENDING_COMPANY_SELECTION
                && !row.req_completed
            {
                row.status = registry_status::SCRAPING_COMPANY_DATA.to_string();
                row.worker_id = Some(worker_id.to_string());
                row.processing_started_at = Some(Utc::now());
                row.updated_at = Some(Utc::now());
                return Ok(Some(row.clone()));
            }
        }
        Ok(None)
    }

    async fn complete_registry(&self, job_id: Uuid) -> StoreResult<()> {
        let mut inner = self.lock();
        if let Some(row) = inner.registries.iter_mut().find(|r| r.id == job_id) {
            row.status = registry_status::PENDING_NAME_SELECTION.to_string();
            row.req_completed = true;
            row.error_message = None;
            row.worker_id = None;
            row.processing_started_at = None;
            row.completed_at = Some(Utc::now());
            row.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn fail_registry(&self, job_id: Uuid, message: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        if let Some(row) = inner.registries.iter_mut().find(|r| r.id == job_id) {
            row.status = registry_status::FAILED.to_string();
            row.error_message = Some(message.to_string());
            row.worker_id = None;
            row.processing_started_at = None;
            row.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn reset_stuck_registry(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        let mut inner = self.lock();
        let mut reset = Vec::new();
        for row in inner.registries.iter_mut() {
            if row.status == registry_status::SCRAPING_COMPANY_DATA
                && row.processing_started_at.is_some_and(|t| t < older_than)
            {
                row.status = registry_status::PENDING_COMPANY_SELECTION.to_string();
                row.worker_id = None;
                row.processing_started_at = None;
                reset.push(row.id);
            }
        }
        Ok(reset)
    }

    async fn next_pending_personal(&self) -> StoreResult<Option<PersonalRightsJob>> {
        let inner = self.lock();
        Ok(inner
            .personals
            .iter()
            .filter(|p| p.status == personal_status::PENDING)
            .min_by_key(|p| p.created_at)
            .cloned())
    }

    async fn claim_personal(
        &self,
        job_id: Uuid,
        worker_id: &str,
    ) -> StoreResult<Option<PersonalRightsJob>> {
        let mut inner = self.lock();
        for row in inner.personals.iter_mut() {
            if row.id == job_id && row.status == personal_status::PENDING {
                row.status = personal_status::IN_PROGRESS.to_string();
                row.worker_id = Some(worker_id.to_string());
                row.started_at = Some(Utc::now());
                row.updated_at = Some(Utc::now());
                return Ok(Some(row.clone()));
            }
        }
        Ok(None)
    }

    async fn complete_personal(&self, job_id: Uuid, storage_path: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        if let Some(row) = inner.personals.iter_mut().find(|p| p.id == job_id) {
            row.status = personal_status::COMPLETED.to_string();
            row.storage_path = Some(storage_path.to_string());
            row.error_message = None;
            row.worker_id = None;
            row.completed_at = Some(Utc::now());
            row.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn fail_personal(
        &self,
        job_id: Uuid,
        failure: PersonalFailure,
        message: &str,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        if let Some(row) = inner.personals.iter_mut().find(|p| p.id == job_id) {
            row.status = failure.status().to_string();
            row.error_message = Some(message.to_string());
            row.worker_id = None;
            row.completed_at = Some(Utc::now());
            row.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn reset_stuck_personal(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        let mut inner = self.lock();
        let mut reset = Vec::new();
        for row in inner.personals.iter_mut() {
            if row.status == personal_status::IN_PROGRESS
                && row.started_at.is_some_and(|t| t < older_than)
            {
                row.status = personal_status::PENDING.to_string();
                row.worker_id = None;
                row.started_at = None;
                reset.push(row.id);
            }
        }
        Ok(reset)
    }

    async fn complete_session_if_done(&self, session_id: Uuid) -> StoreResult<bool> {
        let mut inner = self.lock();
        let all_terminal = inner
            .personals
            .iter()
            .filter(|p| p.search_session_id == session_id)
            .all(|p| {
                matches!(
                    p.status.as_str(),
                    personal_status::COMPLETED
                        | personal_status::FAILED
                        | personal_status::NOT_FOUND
                )
            });
        if !all_terminal {
            return Ok(false);
        }
        if let Some(session) = inner
            .registries
            .iter_mut()
            .find(|r| r.id == session_id && r.status != registry_status::COMPLETED)
        {
            session.status = registry_status::COMPLETED.to_string();
            session.completed_at = Some(Utc::now());
            session.updated_at = Some(Utc::now());
            return Ok(true);
        }
        Ok(false)
    }

    async fn count_ocr_backlog(&self, mode: OcrMode) -> StoreResult<i64> {
        self.ocr_guard()?;
        let source = mode.document_source().as_str();
        let inner = self.lock();
        Ok(inner
            .extractions
            .iter()
            .filter(|e| {
                e.job.status_id == 3
                    && e.job.document_source.as_deref() == Some(source)
                    && e.job.ocr_attempts < e.job.ocr_max_attempts
            })
            .count() as i64)
    }

    async fn next_ocr_candidate(&self, mode: OcrMode) -> StoreResult<Option<ExtractionJob>> {
        self.ocr_guard()?;
        let source = mode.document_source().as_str();
        let inner = self.lock();
        Ok(inner
            .extractions
            .iter()
            .filter(|e| {
                e.job.status_id == 3
                    && e.job.document_source.as_deref() == Some(source)
                    && e.job.ocr_attempts < e.job.ocr_max_attempts
            })
            .min_by_key(|e| e.job.created_at)
            .map(|e| e.job.clone()))
    }

    async fn claim_ocr(
        &self,
        job_id: Uuid,
        worker_id: &str,
        mode: OcrMode,
    ) -> StoreResult<Option<ExtractionJob>> {
        self.ocr_guard()?;
        let source = mode.document_source().as_str();
        let mut inner = self.lock();
        for entry in inner.extractions.iter_mut() {
            if entry.job.id == job_id
                && entry.job.status_id == 3
                && entry.job.document_source.as_deref() == Some(source)
                && entry.job.ocr_attempts < entry.job.ocr_max_attempts
            {
                entry.job.status_id = 6;
                entry.job.ocr_worker_id = Some(worker_id.to_string());
                entry.job.ocr_started_at = Some(Utc::now());
                return Ok(Some(entry.job.clone()));
            }
        }
        Ok(None)
    }

    async fn complete_ocr(
        &self,
        job_id: Uuid,
        raw_text: &str,
        boosted_text: &str,
    ) -> StoreResult<()> {
        self.ocr_guard()?;
        let mut inner = self.lock();
        if let Some(entry) = inner.extractions.iter_mut().find(|e| e.job.id == job_id) {
            entry.job.status_id = 5;
            entry.file_content = Some(raw_text.to_string());
            entry.boosted_file_content = Some(boosted_text.to_string());
            entry.job.ocr_completed_at = Some(Utc::now());
            entry.job.ocr_worker_id = None;
            entry.job.ocr_error = None;
        }
        Ok(())
    }

    async fn release_ocr(&self, job_id: Uuid, message: &str) -> StoreResult<ReleaseOutcome> {
        self.ocr_guard()?;
        let mut inner = self.lock();
        let Some(entry) = inner
            .extractions
            .iter_mut()
            .find(|e| e.job.id == job_id && e.job.status_id == 6)
        else {
            return Ok(ReleaseOutcome::NotInProgress);
        };
        entry.job.ocr_attempts += 1;
        entry.job.ocr_error = Some(message.to_string());
        entry.job.ocr_last_error_at = Some(Utc::now());
        entry.job.ocr_worker_id = None;
        entry.job.ocr_started_at = None;
        if entry.job.ocr_attempts >= entry.job.ocr_max_attempts {
            entry.job.status_id = 4;
            Ok(ReleaseOutcome::Exhausted)
        } else {
            entry.job.status_id = 3;
            Ok(ReleaseOutcome::Requeued {
                attempts: entry.job.ocr_attempts,
            })
        }
    }

    async fn reset_stuck_ocr(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        self.ocr_guard()?;
        let mut inner = self.lock();
        let mut reset = Vec::new();
        for entry in inner.extractions.iter_mut() {
            if entry.job.status_id == 6 && entry.job.ocr_started_at.is_some_and(|t| t < older_than)
            {
                entry.job.status_id = 3;
                entry.job.ocr_worker_id = None;
                entry.job.ocr_started_at = None;
                reset.push(entry.job.id);
            }
        }
        Ok(reset)
    }

    async fn upsert_heartbeat(&self, heartbeat: &WorkerHeartbeat) -> StoreResult<()> {
        let mut inner = self.lock();
        let entry = inner
            .workers
            .entry(heartbeat.worker_id.clone())
            .or_insert_with(|| MemWorkerRow {
                status: heartbeat.status.as_str().to_string(),
                current_job_id: heartbeat.current_job_id,
                last_heartbeat: Utc::now(),
                jobs_completed: 0,
                jobs_failed: 0,
                started_at: heartbeat.started_at,
                account_id: heartbeat.account_id,
            });
        entry.status = heartbeat.status.as_str().to_string();
        entry.current_job_id = heartbeat.current_job_id;
        entry.last_heartbeat = Utc::now();
        entry.jobs_completed = heartbeat.jobs_completed;
        entry.jobs_failed = heartbeat.jobs_failed;
        entry.account_id = heartbeat.account_id;
        Ok(())
    }

    async fn mark_dead_workers(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<String>> {
        let mut inner = self.lock();
        let mut flipped = Vec::new();
        for (worker_id, row) in inner.workers.iter_mut() {
            if row.last_heartbeat < older_than && matches!(row.status.as_str(), "idle" | "busy") {
                row.status = "offline".to_string();
                flipped.push(worker_id.clone());
            }
        }
        if !flipped.is_empty() {
            for entry in inner.extractions.iter_mut() {
                if entry.job.status_id == 2
                    && entry
                        .job
                        .worker_id
                        .as_deref()
                        .is_some_and(|w| flipped.iter().any(|f| f == w))
                {
                    entry.job.attempts += 1;
                    entry.job.error_message = Some("owning worker marked offline".to_string());
                    entry.job.worker_id = None;
                    entry.job.processing_started_at = None;
                    entry.job.status_id = if entry.job.attempts >= entry.job.max_attempts {
                        4
                    } else {
                        1
                    };
                }
                if entry.job.status_id == 6
                    && entry
                        .job
                        .ocr_worker_id
                        .as_deref()
                        .is_some_and(|w| flipped.iter().any(|f| f == w))
                {
                    entry.job.ocr_attempts += 1;
                    entry.job.ocr_error = Some("owning worker marked offline".to_string());
                    entry.job.ocr_worker_id = None;
                    entry.job.ocr_started_at = None;
                    entry.job.status_id = if entry.job.ocr_attempts >= entry.job.ocr_max_attempts {
                        4
                    } else {
                        3
                    };
                }
            }
            for row in inner.registries.iter_mut() {
                if row.status == registry_status::SCRAPING_COMPANY_DATA
                    && row
                        .worker_id
                        .as_deref()
                        .is_some_and(|w| flipped.iter().any(|f| f == w))
                {
                    row.status = registry_status::PENDING_COMPANY_SELECTION.to_string();
                    row.worker_id = None;
                    row.processing_started_at = None;
                }
            }
            for row in inner.personals.iter_mut() {
                if row.status == personal_status::IN_PROGRESS
                    && row
                        .worker_id
                        .as_deref()
                        .is_some_and(|w| flipped.iter().any(|f| f == w))
                {
                    row.status = personal_status::PENDING.to_string();
                    row.worker_id = None;
                    row.started_at = None;
                }
            }
        }
        Ok(flipped)
    }

    async fn queue_stats(&self, family: JobFamily) -> StoreResult<QueueStats> {
        let inner = self.lock();
        let stats = match family {
            JobFamily::Extraction => QueueStats {
                pending: inner
                    .extractions
                    .iter()
                    .filter(|e| e.job.status_id == 1)
                    .count() as i64,
                processing: inner
                    .extractions
                    .iter()
                    .filter(|e| matches!(e.job.status_id, 2 | 6))
                    .count() as i64,
                failed: inner
                    .extractions
                    .iter()
                    .filter(|e| e.job.status_id == 4)
                    .count() as i64,
                oldest_pending_secs: None,
            },
            JobFamily::RegistryScrape => QueueStats {
                pending: inner
                    .registries
                    .iter()
                    .filter(|r| {
                        r.status == registry_status::PENDING_COMPANY_SELECTION && !r.req_completed
                    })
                    .count() as i64,
                processing: inner
                    .registries
                    .iter()
                    .filter(|r| r.status == registry_status::SCRAPING_COMPANY_DATA)
                    .count() as i64,
                failed: inner
                    .registries
                    .iter()
                    .filter(|r| r.status == registry_status::FAILED)
                    .count() as i64,
                oldest_pending_secs: None,
            },
            JobFamily::PersonalRights => QueueStats {
                pending: inner
                    .personals
                    .iter()
                    .filter(|p| p.status == personal_status::PENDING)
                    .count() as i64,
                processing: inner
                    .personals
                    .iter()
                    .filter(|p| p.status == personal_status::IN_PROGRESS)
                    .count() as i64,
                failed: inner
                    .personals
                    .iter()
                    .filter(|p| {
                        matches!(
                            p.status.as_str(),
                            personal_status::FAILED | personal_status::NOT_FOUND
                        )
                    })
                    .count() as i64,
                oldest_pending_secs: None,
            },
        };
        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Scripted engines
// ---------------------------------------------------------------------------

/// Extraction engine driven by a queue of scripted outcomes; defaults to
/// success with a `bucket/<job id>.pdf` artifact.
#[derive(Default)]
pub struct ScriptedExtractionEngine {
    outcomes: Mutex<VecDeque<Result<ExtractionOutput, ExtractionError>>>,
    invocations: Mutex<Vec<ExtractionJob>>,
    pub delay: Duration,
}

impl ScriptedExtractionEngine {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_outcomes(
        outcomes: Vec<Result<ExtractionOutput, ExtractionError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Self::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    pub fn invocations(&self) -> Vec<ExtractionJob> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExtractionEngine for ScriptedExtractionEngine {
    async fn run(
        &self,
        job: &ExtractionJob,
        _lease: &CredentialLease,
    ) -> Result<ExtractionOutput, ExtractionError> {
        self.invocations.lock().unwrap().push(job.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(outcome) = self.outcomes.lock().unwrap().pop_front() {
            return outcome;
        }
        let bucket = job
            .source()
            .map(|s| s.bucket())
            .unwrap_or(DocumentSource::Index.bucket());
        Ok(ExtractionOutput {
            artifact: ArtifactRef::new(bucket, format!("{}.pdf", job.id)),
        })
    }
}

#[derive(Default)]
pub struct ScriptedRegistryScraper {
    outcomes: Mutex<VecDeque<Result<(), ScraperError>>>,
    invocations: AtomicUsize,
}

impl ScriptedRegistryScraper {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_outcomes(outcomes: Vec<Result<(), ScraperError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            invocations: AtomicUsize::new(0),
        })
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryScraper for ScriptedRegistryScraper {
    async fn run(&self, _job: &RegistryScrapeJob) -> Result<(), ScraperError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

#[derive(Default)]
pub struct ScriptedPersonalScraper {
    outcomes: Mutex<VecDeque<Result<ArtifactRef, ScraperError>>>,
    invocations: AtomicUsize,
}

impl ScriptedPersonalScraper {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_outcomes(outcomes: Vec<Result<ArtifactRef, ScraperError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            invocations: AtomicUsize::new(0),
        })
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersonalRightsScraper for ScriptedPersonalScraper {
    async fn run(&self, job: &PersonalRightsJob) -> Result<ArtifactRef, ScraperError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(outcome) = self.outcomes.lock().unwrap().pop_front() {
            return outcome;
        }
        Ok(ArtifactRef::new("rdprm-documents", format!("{}.pdf", job.id)))
    }
}

#[derive(Default)]
pub struct ScriptedOcrEngine {
    outcomes: Mutex<VecDeque<Result<OcrOutput, OcrError>>>,
    invocations: Mutex<Vec<(String, DocumentSource)>>,
}

impl ScriptedOcrEngine {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_outcomes(outcomes: Vec<Result<OcrOutput, OcrError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            invocations: Mutex::new(Vec::new()),
        })
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    pub fn invocations(&self) -> Vec<(String, DocumentSource)> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl OcrEngine for ScriptedOcrEngine {
    async fn run(&self, pdf_path: &str, source: DocumentSource) -> Result<OcrOutput, OcrError> {
        self.invocations
            .lock()
            .unwrap()
            .push((pdf_path.to_string(), source));
        if let Some(outcome) = self.outcomes.lock().unwrap().pop_front() {
            return outcome;
        }
        Ok(OcrOutput {
            raw_text: "raw text".to_string(),
            boosted_text: "boosted text".to_string(),
        })
    }
}

/// Vault that always leases (or always denies) and counts the traffic
pub struct StaticVault {
    deny: bool,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
}

impl StaticVault {
    pub fn granting() -> Arc<Self> {
        Arc::new(Self {
            deny: false,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        })
    }

    pub fn denying() -> Arc<Self> {
        Arc::new(Self {
            deny: true,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CredentialVault for StaticVault {
    async fn acquire(&self) -> Result<CredentialLease, NoCredentialsAvailable> {
        if self.deny {
            return Err(NoCredentialsAvailable);
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(CredentialLease {
            lease_id: Uuid::new_v4(),
            account_id: None,
        })
    }

    async fn release(&self, _lease: CredentialLease) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Every scripted engine plus the assembled [`Engines`] bundle
pub struct TestEngines {
    pub engines: Engines,
    pub extraction: Arc<ScriptedExtractionEngine>,
    pub registry: Arc<ScriptedRegistryScraper>,
    pub personal: Arc<ScriptedPersonalScraper>,
    pub ocr: Arc<ScriptedOcrEngine>,
    pub vault: Arc<StaticVault>,
}

impl TestEngines {
    pub fn succeeding() -> Self {
        Self::build(
            ScriptedExtractionEngine::succeeding(),
            ScriptedRegistryScraper::succeeding(),
            ScriptedPersonalScraper::succeeding(),
            ScriptedOcrEngine::succeeding(),
            StaticVault::granting(),
        )
    }

    pub fn build(
        extraction: Arc<ScriptedExtractionEngine>,
        registry: Arc<ScriptedRegistryScraper>,
        personal: Arc<ScriptedPersonalScraper>,
        ocr: Arc<ScriptedOcrEngine>,
        vault: Arc<StaticVault>,
    ) -> Self {
        let engines = Engines {
            extraction: extraction.clone(),
            registry: registry.clone(),
            personal: personal.clone(),
            ocr: ocr.clone(),
            vault: vault.clone(),
        };
        Self {
            engines,
            extraction,
            registry,
            personal,
            ocr,
            vault,
        }
    }
}

// ---------------------------------------------------------------------------
// Row builders and helpers
// ---------------------------------------------------------------------------

pub fn pending_extraction(source: DocumentSource) -> ExtractionJob {
    ExtractionJob {
        id: Uuid::new_v4(),
        status_id: 1,
        document_source: Some(source.as_str().to_string()),
        document_number: Some("2784195".to_string()),
        circonscription_fonciere: Some("Montreal".to_string()),
        cadastre: Some("Cadastre du Quebec".to_string()),
        designation_secondaire: None,
        worker_id: None,
        processing_started_at: None,
        attempts: 0,
        max_attempts: 3,
        error_message: None,
        supabase_path: None,
        ocr_worker_id: None,
        ocr_started_at: None,
        ocr_completed_at: None,
        ocr_attempts: 0,
        ocr_max_attempts: 3,
        ocr_error: None,
        ocr_last_error_at: None,
        created_at: Utc::now(),
    }
}

/// An extraction row that already has its artifact and is waiting for OCR
pub fn ocr_ready_extraction(source: DocumentSource, supabase_path: &str) -> ExtractionJob {
    let mut job = pending_extraction(source);
    job.status_id = 3;
    job.supabase_path = Some(supabase_path.to_string());
    job
}

pub fn pending_registry() -> RegistryScrapeJob {
    RegistryScrapeJob {
        id: Uuid::new_v4(),
        status: registry_status::PENDING_COMPANY_SELECTION.to_string(),
        req_completed: false,
        initial_search_query: Some("9283-1234 Quebec inc".to_string()),
        worker_id: None,
        processing_started_at: None,
        error_message: None,
        created_at: Utc::now(),
        updated_at: None,
        completed_at: None,
    }
}

pub fn pending_personal(session_id: Uuid) -> PersonalRightsJob {
    PersonalRightsJob {
        id: Uuid::new_v4(),
        search_session_id: session_id,
        search_name: Some("Tremblay, Jean".to_string()),
        status: personal_status::PENDING.to_string(),
        storage_path: None,
        error_message: None,
        worker_id: None,
        started_at: None,
        completed_at: None,
        created_at: Utc::now(),
        updated_at: None,
    }
}

/// Shift a timestamp into the past
pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - ChronoDuration::minutes(minutes)
}

/// Timeouts shrunk so the loops run at test speed
pub fn test_timeouts() -> Timeouts {
    Timeouts {
        extraction: Duration::from_secs(2),
        ocr: Duration::from_secs(2),
        claim: Duration::from_secs(2),
        sweep_interval: Duration::from_millis(100),
        heartbeat_interval: Duration::from_millis(100),
        dead_worker_threshold: Duration::from_secs(180),
        stuck_extraction_threshold: Duration::from_secs(180),
        stuck_ocr_threshold: Duration::from_secs(600),
        stuck_scrape_threshold: Duration::from_secs(300),
        poll_idle_sleep: Duration::from_millis(20),
        rebalance_interval: Duration::from_millis(100),
        startup_sweep_threshold: Duration::from_secs(120),
        shutdown_grace: Duration::from_secs(2),
    }
}

pub fn test_config(worker_count: usize, ocr: OcrPoolSettings) -> WorkerConfig {
    WorkerConfig {
        backends: BTreeMap::new(),
        worker_count,
        ocr,
        timeouts: test_timeouts(),
    }
}

pub fn backend_with(name: BackendName, ocr_enabled: bool, store: Arc<MemoryStore>) -> Backend {
    Backend::new(name, ocr_enabled, store)
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
