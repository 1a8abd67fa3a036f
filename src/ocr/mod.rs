//! OCR worker pool
//!
//! A separately scheduled pool of workers drives the extraction rows' OCR
//! sub-lifecycle. Each worker is typed to one mode (`index` or `acte`), which
//! is the `document_source` filter it claims under. The pool manager splits
//! capacity between the modes and rebalances on a fixed cadence based on the
//! pending backlog composition, never violating the configured per-mode
//! minimums and never exceeding the pool size.
//!
//! Mode changes drain: a worker finishes its current job under the old mode
//! and picks up the new one at the next job boundary.

mod pool;
mod worker;

pub use pool::{initial_allocation, rebalance_target, OcrPoolManager};
pub use worker::OcrWorker;
