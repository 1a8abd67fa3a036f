//! External collaborator contracts
//!
//! The pool never scrapes or OCRs anything itself. Each long-running
//! capability is an injected trait object with a narrow contract; the
//! dispatcher translates its typed outcome into a job-state transition.
//! Cancellation is drop-based: abandoning the returned future cancels the
//! call.

use crate::jobs::{DocumentSource, ExtractionJob, PersonalRightsJob, RegistryScrapeJob};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// A (bucket, path) address in a backend's artifact store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub bucket: String,
    pub path: String,
}

impl ArtifactRef {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }

    /// The `bucket/path` form stored on job rows
    pub fn object_path(&self) -> String {
        format!("{}/{}", self.bucket, self.path)
    }
}

/// Outcome of a successful extraction run
#[derive(Debug, Clone)]
pub struct ExtractionOutput {
    /// Where the downloaded document landed
    pub artifact: ArtifactRef,
}

/// Failures an extraction run can produce
#[derive(Debug, Error, Clone)]
pub enum ExtractionError {
    /// The document does not exist in the registry; terminal, no retry
    #[error("document not found: {0}")]
    NotFound(String),

    /// The run exceeded its own internal deadline; retryable
    #[error("extraction timed out")]
    Timeout,

    /// Infrastructure hiccup (site down, session dropped); retryable
    #[error("transient failure: {0}")]
    Transient(String),

    /// Anything else; retried until attempts are exhausted
    #[error("extraction failed: {0}")]
    Fatal(String),
}

/// Failures a registry or personal-rights scrape can produce
#[derive(Debug, Error, Clone)]
pub enum ScraperError {
    /// The searched company does not exist; terminal `not_found` outcome
    #[error("company not found: {0}")]
    CompanyNotFound(String),

    /// Any other scrape failure
    #[error("scrape failed: {0}")]
    Failed(String),
}

/// Outcome of a successful OCR run
#[derive(Debug, Clone)]
pub struct OcrOutput {
    /// Raw recognized text
    pub raw_text: String,
    /// Post-processed ("boosted") text
    pub boosted_text: String,
}

/// Failures an OCR run can produce; always release-eligible
#[derive(Debug, Error, Clone)]
#[error("ocr failed: {0}")]
pub struct OcrError(pub String);

/// A leased scraping account
#[derive(Debug, Clone)]
pub struct CredentialLease {
    /// Vault-side lease identifier
    pub lease_id: Uuid,
    /// Account the lease maps to, when the vault tracks one
    pub account_id: Option<Uuid>,
}

/// No account is currently leasable
#[derive(Debug, Error, Clone)]
#[error("no scraping credentials available")]
pub struct NoCredentialsAvailable;

/// Runs land-registry extractions against the Quebec registry site
#[async_trait]
pub trait ExtractionEngine: Send + Sync {
    async fn run(
        &self,
        job: &ExtractionJob,
        lease: &CredentialLease,
    ) -> Result<ExtractionOutput, ExtractionError>;
}

/// Runs company-registry scrapes
#[async_trait]
pub trait RegistryScraper: Send + Sync {
    async fn run(&self, job: &RegistryScrapeJob) -> Result<(), ScraperError>;
}

/// Runs personal-rights (RDPRM) searches
#[async_trait]
pub trait PersonalRightsScraper: Send + Sync {
    async fn run(&self, job: &PersonalRightsJob) -> Result<ArtifactRef, ScraperError>;
}

/// Extracts text from a stored PDF
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn run(&self, pdf_path: &str, source: DocumentSource) -> Result<OcrOutput, OcrError>;
}

/// Leases scraping accounts; releasing a lease is the dispatcher's job
#[async_trait]
pub trait CredentialVault: Send + Sync {
    async fn acquire(&self) -> Result<CredentialLease, NoCredentialsAvailable>;
    async fn release(&self, lease: CredentialLease);
}

/// Bundle of all injected collaborators
#[derive(Clone)]
pub struct Engines {
    pub extraction: std::sync::Arc<dyn ExtractionEngine>,
    pub registry: std::sync::Arc<dyn RegistryScraper>,
    pub personal: std::sync::Arc<dyn PersonalRightsScraper>,
    pub ocr: std::sync::Arc<dyn OcrEngine>,
    pub vault: std::sync::Arc<dyn CredentialVault>,
}
