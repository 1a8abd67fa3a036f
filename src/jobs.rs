//! Job families, row types, and status vocabulary
//!
//! Three job families share the pool: land-registry extraction
//! (`extraction_queue`), company-registry scrapes (`search_sessions`), and
//! personal-rights searches (`rdprm_searches`). Extraction rows additionally
//! carry a second, independent OCR lifecycle that only advances once the
//! primary lifecycle has produced an artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Primary lifecycle of an extraction row (`extraction_queue.status_id`)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExtractionStatus {
    /// Waiting to be claimed
    Pending,
    /// Claimed by a worker
    Processing,
    /// Artifact stored; OCR may now claim the row
    Complete,
    /// Terminal failure (extraction or OCR attempts exhausted)
    Error,
    /// OCR text stored; fully done
    ExtractionComplete,
    /// Claimed by an OCR worker
    OcrProcessing,
}

impl ExtractionStatus {
    pub const fn id(self) -> i32 {
        match self {
            ExtractionStatus::Pending => 1,
            ExtractionStatus::Processing => 2,
            ExtractionStatus::Complete => 3,
            ExtractionStatus::Error => 4,
            ExtractionStatus::ExtractionComplete => 5,
            ExtractionStatus::OcrProcessing => 6,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(ExtractionStatus::Pending),
            2 => Some(ExtractionStatus::Processing),
            3 => Some(ExtractionStatus::Complete),
            4 => Some(ExtractionStatus::Error),
            5 => Some(ExtractionStatus::ExtractionComplete),
            6 => Some(ExtractionStatus::OcrProcessing),
            _ => None,
        }
    }
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExtractionStatus::Pending => "pending",
            ExtractionStatus::Processing => "processing",
            ExtractionStatus::Complete => "complete",
            ExtractionStatus::Error => "error",
            ExtractionStatus::ExtractionComplete => "extraction_complete",
            ExtractionStatus::OcrProcessing => "ocr_processing",
        };
        write!(f, "{name}")
    }
}

/// Registry-scrape lifecycle values (`search_sessions.status`)
pub mod registry_status {
    pub const PENDING_COMPANY_SELECTION: &str = "pending_company_selection";
    pub const SCRAPING_COMPANY_DATA: &str = "scraping_company_data";
    pub const PENDING_NAME_SELECTION: &str = "pending_name_selection";
    pub const FAILED: &str = "failed";
    pub const COMPLETED: &str = "completed";
}

/// Personal-rights lifecycle values (`rdprm_searches.status`)
pub mod personal_status {
    pub const PENDING: &str = "pending";
    pub const IN_PROGRESS: &str = "in_progress";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
    pub const NOT_FOUND: &str = "not_found";
}

/// Source registry of an extraction document (`document_source`)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    Index,
    Acte,
    PlanCadastraux,
}

impl DocumentSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            DocumentSource::Index => "index",
            DocumentSource::Acte => "acte",
            DocumentSource::PlanCadastraux => "plan_cadastraux",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "index" => Some(DocumentSource::Index),
            "acte" => Some(DocumentSource::Acte),
            "plan_cadastraux" => Some(DocumentSource::PlanCadastraux),
            _ => None,
        }
    }

    /// Artifact-store bucket for documents of this source
    pub const fn bucket(self) -> &'static str {
        match self {
            DocumentSource::Index => "index",
            DocumentSource::Acte => "actes",
            DocumentSource::PlanCadastraux => "plans-cadastraux",
        }
    }
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The document filter an OCR worker applies when claiming
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OcrMode {
    Index,
    Acte,
}

impl OcrMode {
    /// `document_source` value this mode claims
    pub const fn document_source(self) -> DocumentSource {
        match self {
            OcrMode::Index => DocumentSource::Index,
            OcrMode::Acte => DocumentSource::Acte,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            OcrMode::Index => "index",
            OcrMode::Acte => "acte",
        }
    }
}

impl fmt::Display for OcrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The three job families, in dispatch priority order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobFamily {
    Extraction,
    RegistryScrape,
    PersonalRights,
}

impl JobFamily {
    /// Dispatch priority: extraction first, personal rights last
    pub const PRIORITY: [JobFamily; 3] = [
        JobFamily::Extraction,
        JobFamily::RegistryScrape,
        JobFamily::PersonalRights,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            JobFamily::Extraction => "extraction",
            JobFamily::RegistryScrape => "registry_scrape",
            JobFamily::PersonalRights => "personal_rights",
        }
    }
}

impl fmt::Display for JobFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Worker liveness states (`worker_status.status`)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
    Stopped,
}

impl WorkerStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Offline => "offline",
            WorkerStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of `extraction_queue`
///
/// `file_content`/`boosted_file_content` are deliberately not carried here;
/// OCR text is written terminally and never read back by the pool.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExtractionJob {
    pub id: Uuid,
    pub status_id: i32,
    pub document_source: Option<String>,
    pub document_number: Option<String>,
    pub circonscription_fonciere: Option<String>,
    pub cadastre: Option<String>,
    pub designation_secondaire: Option<String>,
    pub worker_id: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub error_message: Option<String>,
    pub supabase_path: Option<String>,
    pub ocr_worker_id: Option<String>,
    pub ocr_started_at: Option<DateTime<Utc>>,
    pub ocr_completed_at: Option<DateTime<Utc>>,
    pub ocr_attempts: i32,
    pub ocr_max_attempts: i32,
    pub ocr_error: Option<String>,
    pub ocr_last_error_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ExtractionJob {
    pub fn status(&self) -> Option<ExtractionStatus> {
        ExtractionStatus::from_id(self.status_id)
    }

    pub fn source(&self) -> Option<DocumentSource> {
        self.document_source.as_deref().and_then(DocumentSource::parse)
    }
}

/// One row of `search_sessions` viewed as a registry-scrape job
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RegistryScrapeJob {
    pub id: Uuid,
    pub status: String,
    pub req_completed: bool,
    pub initial_search_query: Option<String>,
    pub worker_id: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One row of `rdprm_searches`
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PersonalRightsJob {
    pub id: Uuid,
    pub search_session_id: Uuid,
    pub search_name: Option<String>,
    pub status: String,
    pub storage_path: Option<String>,
    pub error_message: Option<String>,
    pub worker_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Terminal outcomes for a personal-rights job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonalFailure {
    /// Generic scrape failure
    Failed,
    /// The target company does not exist in the registry
    NotFound,
}

impl PersonalFailure {
    pub const fn status(self) -> &'static str {
        match self {
            PersonalFailure::Failed => personal_status::FAILED,
            PersonalFailure::NotFound => personal_status::NOT_FOUND,
        }
    }
}

/// Result of releasing an in-progress job back to its queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Returned to pending with the incremented attempt count
    Requeued { attempts: i32 },
    /// Attempts exhausted; the row is now terminally failed
    Exhausted,
    /// The row was not in-progress (already swept or finished)
    NotInProgress,
}

/// Snapshot written to the `worker_status` row
#[derive(Debug, Clone)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub status: WorkerStatus,
    pub current_job_id: Option<Uuid>,
    pub jobs_completed: i32,
    pub jobs_failed: i32,
    pub started_at: DateTime<Utc>,
    pub account_id: Option<Uuid>,
}

/// Aggregate queue counts for one family on one backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub failed: i64,
    /// Age of the oldest pending row, if any
    pub oldest_pending_secs: Option<i64>,
}

/// Build a process-lifetime-unique worker identifier
pub fn worker_id(role: &str) -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{role}-{host}-{}", &suffix[..8])
}
