//! Postgres claim-store implementation
//!
//! All SQL lives here. Claims are single conditional updates with the pending
//! predicate in the WHERE clause and `RETURNING` for the updated row, which
//! linearizes contending workers on the backend. Releases fold the
//! attempt-exhaustion escalation into the same statement so there is no
//! read-modify-write window.
//!
//! Every call is bounded by the configured claim deadline and retried with
//! exponential backoff on transient failures. Missing-column and
//! missing-table errors surface as `StoreError::Schema` so callers can
//! degrade per backend instead of crashing the worker.

use crate::config::{BackendSettings, ConfigError, Timeouts};
use crate::error::{StoreError, StoreResult};
use crate::jobs::{
    registry_status, ExtractionJob, JobFamily, OcrMode, PersonalFailure, PersonalRightsJob,
    QueueStats, RegistryScrapeJob, ReleaseOutcome, WorkerHeartbeat,
};
use crate::store::{JobStore, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const EXTRACTION_COLUMNS: &str = "id, status_id, document_source, document_number, \
     circonscription_fonciere, cadastre, designation_secondaire, worker_id, \
     processing_started_at, attempts, max_attempts, error_message, supabase_path, \
     ocr_worker_id, ocr_started_at, ocr_completed_at, ocr_attempts, ocr_max_attempts, \
     ocr_error, ocr_last_error_at, created_at";

const REGISTRY_COLUMNS: &str = "id, status, req_completed, initial_search_query, worker_id, \
     processing_started_at, error_message, created_at, updated_at, completed_at";

const PERSONAL_COLUMNS: &str = "id, search_session_id, search_name, status, storage_path, \
     error_message, worker_id, started_at, completed_at, created_at, updated_at";

/// Error text stored on jobs released because their owner went offline
const DEAD_WORKER_MESSAGE: &str = "owning worker marked offline";

/// Postgres-backed job store for one backend
pub struct PgStore {
    pool: PgPool,
    call_timeout: Duration,
    retry: RetryPolicy,
}

impl PgStore {
    /// Create a store over an existing pool
    pub fn new(pool: PgPool, call_timeout: Duration) -> Self {
        Self {
            pool,
            call_timeout,
            retry: RetryPolicy::default(),
        }
    }

    /// Build a lazily-connecting store from backend settings.
    ///
    /// No connection is made until the first operation, so an unreachable
    /// backend costs nothing at startup.
    pub fn connect_lazy(
        settings: &BackendSettings,
        timeouts: &Timeouts,
    ) -> Result<Self, ConfigError> {
        let url = settings.database_url()?;
        let options = PgConnectOptions::from_str(&url)
            .map_err(|e| ConfigError::InvalidBackendUrl(format!("{}: {e}", settings.url)))?
            .application_name("registre-pool");

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(timeouts.claim)
            .connect_lazy_with(options);

        Ok(Self::new(pool, timeouts.claim))
    }

    /// Apply the bundled migrations (dev/test provisioning; production
    /// schemas are managed by the backends themselves).
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run `f` with the call deadline applied, retrying transient failures
    /// with exponential backoff.
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, f: F) -> StoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        let mut attempt: u32 = 1;
        loop {
            let err = match tokio::time::timeout(self.call_timeout, f()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => StoreError::from(err),
                Err(_) => StoreError::Timeout(self.call_timeout),
            };

            if err.is_transient() && attempt < self.retry.max_attempts {
                let delay = self.retry.jittered_delay_for(attempt);
                debug!(operation, attempt, ?delay, error = %err, "retrying transient store failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            return Err(err);
        }
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn next_pending_extraction(&self) -> StoreResult<Option<ExtractionJob>> {
        let sql = format!(
            "SELECT {EXTRACTION_COLUMNS} FROM extraction_queue \
             WHERE status_id = 1 AND attempts < max_attempts \
             ORDER BY created_at ASC LIMIT 1"
        );
        self.with_retry("next_pending_extraction", || async {
            sqlx::query_as::<_, ExtractionJob>(&sql)
                .fetch_optional(&self.pool)
                .await
        })
        .await
    }

    async fn claim_extraction(
        &self,
        job_id: Uuid,
        worker_id: &str,
    ) -> StoreResult<Option<ExtractionJob>> {
        let sql = format!(
            "UPDATE extraction_queue \
             SET status_id = 2, worker_id = $2, processing_started_at = $3 \
             WHERE id = $1 AND status_id = 1 \
             RETURNING {EXTRACTION_COLUMNS}"
        );
        self.with_retry("claim_extraction", || async {
            sqlx::query_as::<_, ExtractionJob>(&sql)
                .bind(job_id)
                .bind(worker_id)
                .bind(Utc::now())
                .fetch_optional(&self.pool)
                .await
        })
        .await
    }

    async fn complete_extraction(&self, job_id: Uuid, supabase_path: &str) -> StoreResult<()> {
        self.with_retry("complete_extraction", || async {
            sqlx::query(
                "UPDATE extraction_queue \
                 SET status_id = 3, supabase_path = $2, error_message = NULL, \
                     worker_id = NULL, processing_started_at = NULL \
                 WHERE id = $1",
            )
            .bind(job_id)
            .bind(supabase_path)
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    async fn fail_extraction(&self, job_id: Uuid, message: &str) -> StoreResult<()> {
        self.with_retry("fail_extraction", || async {
            sqlx::query(
                "UPDATE extraction_queue \
                 SET status_id = 4, error_message = $2, \
                     worker_id = NULL, processing_started_at = NULL \
                 WHERE id = $1",
            )
            .bind(job_id)
            .bind(message)
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    async fn release_extraction(
        &self,
        job_id: Uuid,
        message: &str,
    ) -> StoreResult<ReleaseOutcome> {
        self.with_retry("release_extraction", || async {
            let row = sqlx::query(
                "UPDATE extraction_queue \
                 SET attempts = attempts + 1, \
                     status_id = CASE WHEN attempts + 1 >= max_attempts THEN 4 ELSE 1 END, \
                     error_message = $2, \
                     worker_id = NULL, processing_started_at = NULL \
                 WHERE id = $1 AND status_id = 2 \
                 RETURNING status_id, attempts",
            )
            .bind(job_id)
            .bind(message)
            .fetch_optional(&self.pool)
            .await?;

            Ok(match row {
                None => ReleaseOutcome::NotInProgress,
                Some(row) => {
                    let status_id: i32 = row.try_get("status_id")?;
                    let attempts: i32 = row.try_get("attempts")?;
                    if status_id == 4 {
                        ReleaseOutcome::Exhausted
                    } else {
                        ReleaseOutcome::Requeued { attempts }
                    }
                }
            })
        })
        .await
    }

    async fn reset_stuck_extractions(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        self.with_retry("reset_stuck_extractions", || async {
            let rows = sqlx::query(
                "UPDATE extraction_queue \
                 SET status_id = 1, worker_id = NULL, processing_started_at = NULL \
                 WHERE status_id = 2 AND processing_started_at < $1 \
                 RETURNING id",
            )
            .bind(older_than)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(|r| r.try_get("id")).collect()
        })
        .await
    }

    async fn next_pending_registry(&self) -> StoreResult<Option<RegistryScrapeJob>> {
        let sql = format!(
            "SELECT {REGISTRY_COLUMNS} FROM search_sessions \
             WHERE status = $1 AND req_completed = false \
             ORDER BY created_at ASC LIMIT 1"
        );
        self.with_retry("next_pending_registry", || async {
            sqlx::query_as::<_, RegistryScrapeJob>(&sql)
                .bind(registry_status::PENDING_COMPANY_SELECTION)
                .fetch_optional(&self.pool)
                .await
        })
        .await
    }

    async fn claim_registry(
        &self,
        job_id: Uuid,
        worker_id: &str,
    ) -> StoreResult<Option<RegistryScrapeJob>> {
        let sql = format!(
            "UPDATE search_sessions \
             SET status = $4, worker_id = $2, processing_started_at = $3, updated_at = $3 \
             WHERE id = $1 AND status = $5 AND req_completed = false \
             RETURNING {REGISTRY_COLUMNS}"
        );
        self.with_retry("claim_registry", || async {
            sqlx::query_as::<_, RegistryScrapeJob>(&sql)
                .bind(job_id)
                .bind(worker_id)
                .bind(Utc::now())
                .bind(registry_status::SCRAPING_COMPANY_DATA)
                .bind(registry_status::PENDING_COMPANY_SELECTION)
                .fetch_optional(&self.pool)
                .await
        })
        .await
    }

    async fn complete_registry(&self, job_id: Uuid) -> StoreResult<()> {
        self.with_retry("complete_registry", || async {
            sqlx::query(
                "UPDATE search_sessions \
                 SET status = $2, req_completed = true, error_message = NULL, \
                     worker_id = NULL, processing_started_at = NULL, \
                     completed_at = $3, updated_at = $3 \
                 WHERE id = $1",
            )
            .bind(job_id)
            .bind(registry_status::PENDING_NAME_SELECTION)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    async fn fail_registry(&self, job_id: Uuid, message: &str) -> StoreResult<()> {
        self.with_retry("fail_registry", || async {
            sqlx::query(
                "UPDATE search_sessions \
                 SET status = $2, error_message = $3, \
                     worker_id = NULL, processing_started_at = NULL, updated_at = $4 \
                 WHERE id = $1",
            )
            .bind(job_id)
            .bind(registry_status::FAILED)
            .bind(message)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    async fn reset_stuck_registry(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        self.with_retry("reset_stuck_registry", || async {
            let rows = sqlx::query(
                "UPDATE search_sessions \
                 SET status = $2, worker_id = NULL, processing_started_at = NULL, updated_at = $3 \
                 WHERE status = $1 AND processing_started_at < $4 \
                 RETURNING id",
            )
            .bind(registry_status::SCRAPING_COMPANY_DATA)
            .bind(registry_status::PENDING_COMPANY_SELECTION)
            .bind(Utc::now())
            .bind(older_than)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(|r| r.try_get("id")).collect()
        })
        .await
    }

    async fn next_pending_personal(&self) -> StoreResult<Option<PersonalRightsJob>> {
        let sql = format!(
            "SELECT {PERSONAL_COLUMNS} FROM rdprm_searches \
             WHERE status = 'pending' \
             ORDER BY created_at ASC LIMIT 1"
        );
        self.with_retry("next_pending_personal", || async {
            sqlx::query_as::<_, PersonalRightsJob>(&sql)
                .fetch_optional(&self.pool)
                .await
        })
        .await
    }

    async fn claim_personal(
        &self,
        job_id: Uuid,
        worker_id: &str,
    ) -> StoreResult<Option<PersonalRightsJob>> {
        let sql = format!(
            "UPDATE rdprm_searches \
             SET status = 'in_progress', worker_id = $2, started_at = $3, updated_at = $3 \
             WHERE id = $1 AND status = 'pending' \
             RETURNING {PERSONAL_COLUMNS}"
        );
        self.with_retry("claim_personal", || async {
            sqlx::query_as::<_, PersonalRightsJob>(&sql)
                .bind(job_id)
                .bind(worker_id)
                .bind(Utc::now())
                .fetch_optional(&self.pool)
                .await
        })
        .await
    }

    async fn complete_personal(&self, job_id: Uuid, storage_path: &str) -> StoreResult<()> {
        self.with_retry("complete_personal", || async {
            sqlx::query(
                "UPDATE rdprm_searches \
                 SET status = 'completed', storage_path = $2, error_message = NULL, \
                     worker_id = NULL, completed_at = $3, updated_at = $3 \
                 WHERE id = $1",
            )
            .bind(job_id)
            .bind(storage_path)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    async fn fail_personal(
        &self,
        job_id: Uuid,
        failure: PersonalFailure,
        message: &str,
    ) -> StoreResult<()> {
        self.with_retry("fail_personal", || async {
            sqlx::query(
                "UPDATE rdprm_searches \
                 SET status = $2, error_message = $3, \
                     worker_id = NULL, completed_at = $4, updated_at = $4 \
                 WHERE id = $1",
            )
            .bind(job_id)
            .bind(failure.status())
            .bind(message)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    async fn reset_stuck_personal(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        self.with_retry("reset_stuck_personal", || async {
            let rows = sqlx::query(
                "UPDATE rdprm_searches \
                 SET status = 'pending', worker_id = NULL, started_at = NULL, updated_at = $2 \
                 WHERE status = 'in_progress' AND started_at < $1 \
                 RETURNING id",
            )
            .bind(older_than)
            .bind(Utc::now())
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(|r| r.try_get("id")).collect()
        })
        .await
    }

    async fn complete_session_if_done(&self, session_id: Uuid) -> StoreResult<bool> {
        self.with_retry("complete_session_if_done", || async {
            let result = sqlx::query(
                "UPDATE search_sessions \
                 SET status = $2, completed_at = $3, updated_at = $3 \
                 WHERE id = $1 AND status <> $2 \
                   AND NOT EXISTS ( \
                       SELECT 1 FROM rdprm_searches \
                       WHERE search_session_id = $1 \
                         AND status NOT IN ('completed', 'failed', 'not_found') \
                   )",
            )
            .bind(session_id)
            .bind(registry_status::COMPLETED)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn count_ocr_backlog(&self, mode: OcrMode) -> StoreResult<i64> {
        self.with_retry("count_ocr_backlog", || async {
            let row = sqlx::query(
                "SELECT count(*) AS backlog FROM extraction_queue \
                 WHERE status_id = 3 AND document_source = $1 \
                   AND ocr_attempts < ocr_max_attempts",
            )
            .bind(mode.document_source().as_str())
            .fetch_one(&self.pool)
            .await?;
            row.try_get("backlog")
        })
        .await
    }

    async fn next_ocr_candidate(&self, mode: OcrMode) -> StoreResult<Option<ExtractionJob>> {
        let sql = format!(
            "SELECT {EXTRACTION_COLUMNS} FROM extraction_queue \
             WHERE status_id = 3 AND document_source = $1 \
               AND ocr_attempts < ocr_max_attempts \
             ORDER BY created_at ASC LIMIT 1"
        );
        self.with_retry("next_ocr_candidate", || async {
            sqlx::query_as::<_, ExtractionJob>(&sql)
                .bind(mode.document_source().as_str())
                .fetch_optional(&self.pool)
                .await
        })
        .await
    }

    async fn claim_ocr(
        &self,
        job_id: Uuid,
        worker_id: &str,
        mode: OcrMode,
    ) -> StoreResult<Option<ExtractionJob>> {
        let sql = format!(
            "UPDATE extraction_queue \
             SET status_id = 6, ocr_worker_id = $2, ocr_started_at = $3 \
             WHERE id = $1 AND status_id = 3 AND document_source = $4 \
               AND ocr_attempts < ocr_max_attempts \
             RETURNING {EXTRACTION_COLUMNS}"
        );
        self.with_retry("claim_ocr", || async {
            sqlx::query_as::<_, ExtractionJob>(&sql)
                .bind(job_id)
                .bind(worker_id)
                .bind(Utc::now())
                .bind(mode.document_source().as_str())
                .fetch_optional(&self.pool)
                .await
        })
        .await
    }

    async fn complete_ocr(
        &self,
        job_id: Uuid,
        raw_text: &str,
        boosted_text: &str,
    ) -> StoreResult<()> {
        self.with_retry("complete_ocr", || async {
            sqlx::query(
                "UPDATE extraction_queue \
                 SET status_id = 5, file_content = $2, boosted_file_content = $3, \
                     ocr_completed_at = $4, ocr_worker_id = NULL, ocr_error = NULL \
                 WHERE id = $1",
            )
            .bind(job_id)
            .bind(raw_text)
            .bind(boosted_text)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    async fn release_ocr(&self, job_id: Uuid, message: &str) -> StoreResult<ReleaseOutcome> {
        self.with_retry("release_ocr", || async {
            let row = sqlx::query(
                "UPDATE extraction_queue \
                 SET ocr_attempts = ocr_attempts + 1, \
                     status_id = CASE WHEN ocr_attempts + 1 >= ocr_max_attempts THEN 4 ELSE 3 END, \
                     ocr_error = $2, ocr_last_error_at = $3, \
                     ocr_worker_id = NULL, ocr_started_at = NULL \
                 WHERE id = $1 AND status_id = 6 \
                 RETURNING status_id, ocr_attempts",
            )
            .bind(job_id)
            .bind(message)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

            Ok(match row {
                None => ReleaseOutcome::NotInProgress,
                Some(row) => {
                    let status_id: i32 = row.try_get("status_id")?;
                    let attempts: i32 = row.try_get("ocr_attempts")?;
                    if status_id == 4 {
                        ReleaseOutcome::Exhausted
                    } else {
                        ReleaseOutcome::Requeued { attempts }
                    }
                }
            })
        })
        .await
    }

    async fn reset_stuck_ocr(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        self.with_retry("reset_stuck_ocr", || async {
            let rows = sqlx::query(
                "UPDATE extraction_queue \
                 SET status_id = 3, ocr_worker_id = NULL, ocr_started_at = NULL \
                 WHERE status_id = 6 AND ocr_started_at < $1 \
                 RETURNING id",
            )
            .bind(older_than)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(|r| r.try_get("id")).collect()
        })
        .await
    }

    async fn upsert_heartbeat(&self, heartbeat: &WorkerHeartbeat) -> StoreResult<()> {
        self.with_retry("upsert_heartbeat", || async {
            sqlx::query(
                "INSERT INTO worker_status \
                     (worker_id, status, current_job_id, last_heartbeat, \
                      jobs_completed, jobs_failed, started_at, account_id) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (worker_id) DO UPDATE SET \
                     status = excluded.status, \
                     current_job_id = excluded.current_job_id, \
                     last_heartbeat = excluded.last_heartbeat, \
                     jobs_completed = excluded.jobs_completed, \
                     jobs_failed = excluded.jobs_failed, \
                     account_id = excluded.account_id",
            )
            .bind(&heartbeat.worker_id)
            .bind(heartbeat.status.as_str())
            .bind(heartbeat.current_job_id)
            .bind(Utc::now())
            .bind(heartbeat.jobs_completed)
            .bind(heartbeat.jobs_failed)
            .bind(heartbeat.started_at)
            .bind(heartbeat.account_id)
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    async fn mark_dead_workers(&self, older_than: DateTime<Utc>) -> StoreResult<Vec<String>> {
        self.with_retry("mark_dead_workers", || async {
            let mut tx = self.pool.begin().await?;

            let rows = sqlx::query(
                "UPDATE worker_status SET status = 'offline' \
                 WHERE last_heartbeat < $1 AND status IN ('idle', 'busy') \
                 RETURNING worker_id",
            )
            .bind(older_than)
            .fetch_all(&mut *tx)
            .await?;

            let ids: Vec<String> = rows
                .iter()
                .map(|r| r.try_get("worker_id"))
                .collect::<Result<_, _>>()?;

            if !ids.is_empty() {
                let now = Utc::now();

                sqlx::query(
                    "UPDATE extraction_queue \
                     SET attempts = attempts + 1, \
                         status_id = CASE WHEN attempts + 1 >= max_attempts THEN 4 ELSE 1 END, \
                         error_message = $2, worker_id = NULL, processing_started_at = NULL \
                     WHERE status_id = 2 AND worker_id = ANY($1)",
                )
                .bind(&ids)
                .bind(DEAD_WORKER_MESSAGE)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "UPDATE extraction_queue \
                     SET ocr_attempts = ocr_attempts + 1, \
                         status_id = CASE WHEN ocr_attempts + 1 >= ocr_max_attempts \
                                          THEN 4 ELSE 3 END, \
                         ocr_error = $2, ocr_last_error_at = $3, \
                         ocr_worker_id = NULL, ocr_started_at = NULL \
                     WHERE status_id = 6 AND ocr_worker_id = ANY($1)",
                )
                .bind(&ids)
                .bind(DEAD_WORKER_MESSAGE)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "UPDATE search_sessions \
                     SET status = $2, worker_id = NULL, processing_started_at = NULL, \
                         updated_at = $3 \
                     WHERE status = $4 AND worker_id = ANY($1)",
                )
                .bind(&ids)
                .bind(registry_status::PENDING_COMPANY_SELECTION)
                .bind(now)
                .bind(registry_status::SCRAPING_COMPANY_DATA)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "UPDATE rdprm_searches \
                     SET status = 'pending', worker_id = NULL, started_at = NULL, \
                         updated_at = $2 \
                     WHERE status = 'in_progress' AND worker_id = ANY($1)",
                )
                .bind(&ids)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(ids)
        })
        .await
    }

    async fn queue_stats(&self, family: JobFamily) -> StoreResult<QueueStats> {
        let sql = match family {
            JobFamily::Extraction => {
                "SELECT \
                     count(*) FILTER (WHERE status_id = 1) AS pending, \
                     count(*) FILTER (WHERE status_id IN (2, 6)) AS processing, \
                     count(*) FILTER (WHERE status_id = 4) AS failed, \
                     EXTRACT(EPOCH FROM (now() - min(created_at) \
                         FILTER (WHERE status_id = 1)))::bigint AS oldest_pending_secs \
                 FROM extraction_queue"
            }
            JobFamily::RegistryScrape => {
                "SELECT \
                     count(*) FILTER (WHERE status = 'pending_company_selection' \
                         AND req_completed = false) AS pending, \
                     count(*) FILTER (WHERE status = 'scraping_company_data') AS processing, \
                     count(*) FILTER (WHERE status = 'failed') AS failed, \
                     EXTRACT(EPOCH FROM (now() - min(created_at) \
                         FILTER (WHERE status = 'pending_company_selection' \
                             AND req_completed = false)))::bigint AS oldest_pending_secs \
                 FROM search_sessions"
            }
            JobFamily::PersonalRights => {
                "SELECT \
                     count(*) FILTER (WHERE status = 'pending') AS pending, \
                     count(*) FILTER (WHERE status = 'in_progress') AS processing, \
                     count(*) FILTER (WHERE status IN ('failed', 'not_found')) AS failed, \
                     EXTRACT(EPOCH FROM (now() - min(created_at) \
                         FILTER (WHERE status = 'pending')))::bigint AS oldest_pending_secs \
                 FROM rdprm_searches"
            }
        };

        self.with_retry("queue_stats", || async {
            let row = sqlx::query(sql).fetch_one(&self.pool).await?;
            Ok(QueueStats {
                pending: row.try_get("pending")?,
                processing: row.try_get("processing")?,
                failed: row.try_get("failed")?,
                oldest_pending_secs: row.try_get("oldest_pending_secs")?,
            })
        })
        .await
    }
}
