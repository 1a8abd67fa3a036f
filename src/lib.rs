//! Registre Pool: a distributed worker pool for land-registry jobs
//!
//! # Overview
//!
//! An embeddable pool of workers that drives long-running browser-automation
//! and OCR jobs stored in Supabase/Postgres backends. Jobs arrive only via
//! the shared database; the pool polls several job tables across several
//! independent environments, atomically claims work under contention from
//! peer processes, executes it under strict deadlines, and recovers anything
//! orphaned by a crash.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      WorkerPool                         │
//! │                                                         │
//! │  Dispatcher ×N ──┐                  ┌── OCR worker ×P   │
//! │  (claim/execute) │                  │   (mode-typed)    │
//! │                  ▼                  ▼                   │
//! │            ┌──────────────────────────────┐             │
//! │            │    BackendSet (prod first)   │             │
//! │            │  ClaimStore per backend      │             │
//! │            └──────────────┬───────────────┘             │
//! │                           │ conditional updates         │
//! │  StuckJobSweeper ─────────┤                             │
//! │  HeartbeatRegistrar ──────┘                             │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **Atomic claims**: pending → in-progress transitions are single
//!   conditional updates; at most one contender wins a row
//! - **Crash recovery**: a periodic sweeper returns orphaned in-progress
//!   rows to their queues and flips dead workers offline
//! - **Priority polling**: backends in fixed priority order, families in
//!   fixed priority order, FIFO within a queue, greedy restart after work
//! - **OCR elasticity**: a mode-typed OCR pool rebalances capacity from the
//!   pending backlog composition, draining workers at job boundaries
//! - **Graceful degradation**: missing-schema backends lose the affected
//!   operation for the process lifetime instead of crashing the worker
//!
//! The scraping and OCR engines themselves are injected as trait objects
//! (see [`engines`]); this crate owns dispatch, lifecycle, and recovery.

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod engines;
pub mod error;
pub mod heartbeat;
pub mod jobs;
pub mod logging;
pub mod ocr;
pub mod runtime;
pub mod shutdown;
pub mod store;
pub mod sweeper;

pub use backend::{Backend, BackendName, BackendSet};
pub use config::{BackendSettings, ConfigError, OcrPoolSettings, Timeouts, WorkerConfig};
pub use dispatcher::Dispatcher;
pub use engines::{
    ArtifactRef, CredentialLease, CredentialVault, Engines, ExtractionEngine, ExtractionError,
    ExtractionOutput, NoCredentialsAvailable, OcrEngine, OcrError, OcrOutput,
    PersonalRightsScraper, RegistryScraper, ScraperError,
};
pub use error::{StoreError, StoreResult};
pub use heartbeat::HeartbeatRegistrar;
pub use jobs::{
    DocumentSource, ExtractionJob, ExtractionStatus, JobFamily, OcrMode, PersonalFailure,
    PersonalRightsJob, QueueStats, RegistryScrapeJob, ReleaseOutcome, WorkerHeartbeat,
    WorkerStatus,
};
pub use ocr::{OcrPoolManager, OcrWorker};
pub use runtime::{RuntimeOptions, WorkerPool};
pub use shutdown::{Shutdown, ShutdownListener};
pub use store::{JobStore, PgStore, SchemaGate};
pub use sweeper::StuckJobSweeper;
