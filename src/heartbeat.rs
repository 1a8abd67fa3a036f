//! Worker liveness registration
//!
//! Each dispatcher owns one registrar. The registrar writes the worker's row
//! on start, refreshes `last_heartbeat` on a fixed cadence, and flips the row
//! between busy and idle at job boundaries. Liveness is a process-global
//! concern, so every row goes to the single designated backend (first
//! available in priority order) regardless of which backend the current job
//! came from.
//!
//! The owning worker is the sole writer of its row; peers only ever read it
//! (and the sweeper flips it offline once the heartbeat goes stale).

use crate::backend::Backend;
use crate::error::StoreResult;
use crate::jobs::{WorkerHeartbeat, WorkerStatus};
use crate::shutdown::ShutdownListener;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct HeartbeatState {
    status: WorkerStatus,
    current_job_id: Option<Uuid>,
    jobs_completed: i32,
    jobs_failed: i32,
    account_id: Option<Uuid>,
}

/// Maintains one worker's `worker_status` row
pub struct HeartbeatRegistrar {
    backend: Backend,
    worker_id: String,
    interval: Duration,
    started_at: DateTime<Utc>,
    state: Mutex<HeartbeatState>,
}

impl HeartbeatRegistrar {
    pub fn new(backend: Backend, worker_id: String, interval: Duration) -> Self {
        Self {
            backend,
            worker_id,
            interval,
            started_at: Utc::now(),
            state: Mutex::new(HeartbeatState {
                status: WorkerStatus::Idle,
                current_job_id: None,
                jobs_completed: 0,
                jobs_failed: 0,
                account_id: None,
            }),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Write the initial idle row
    pub async fn register(&self) -> StoreResult<()> {
        self.push().await?;
        info!(worker_id = %self.worker_id, backend = %self.backend.name(), "worker registered");
        Ok(())
    }

    /// Refresh loop; exits after writing `stopped` on shutdown
    pub async fn run(&self, mut shutdown: ShutdownListener) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.push().await {
                        warn!(worker_id = %self.worker_id, error = %e, "heartbeat write failed");
                    }
                }
                _ = shutdown.cancelled() => {
                    self.mark_stopped().await;
                    break;
                }
            }
        }
    }

    /// Record that a job execution began
    pub async fn job_started(&self, job_id: Uuid, account_id: Option<Uuid>) {
        {
            let mut state = self.state.lock().expect("heartbeat state lock poisoned");
            state.status = WorkerStatus::Busy;
            state.current_job_id = Some(job_id);
            state.account_id = account_id;
        }
        if let Err(e) = self.push().await {
            warn!(worker_id = %self.worker_id, error = %e, "busy heartbeat write failed");
        }
    }

    /// Record that a job execution finished
    pub async fn job_finished(&self, success: bool) {
        {
            let mut state = self.state.lock().expect("heartbeat state lock poisoned");
            state.status = WorkerStatus::Idle;
            state.current_job_id = None;
            if success {
                state.jobs_completed += 1;
            } else {
                state.jobs_failed += 1;
            }
        }
        if let Err(e) = self.push().await {
            warn!(worker_id = %self.worker_id, error = %e, "idle heartbeat write failed");
        }
    }

    async fn mark_stopped(&self) {
        {
            let mut state = self.state.lock().expect("heartbeat state lock poisoned");
            state.status = WorkerStatus::Stopped;
            state.current_job_id = None;
        }
        match self.push().await {
            Ok(()) => debug!(worker_id = %self.worker_id, "worker marked stopped"),
            Err(e) => warn!(worker_id = %self.worker_id, error = %e, "failed to mark worker stopped"),
        }
    }

    async fn push(&self) -> StoreResult<()> {
        let snapshot = {
            let state = self.state.lock().expect("heartbeat state lock poisoned");
            WorkerHeartbeat {
                worker_id: self.worker_id.clone(),
                status: state.status,
                current_job_id: state.current_job_id,
                jobs_completed: state.jobs_completed,
                jobs_failed: state.jobs_failed,
                started_at: self.started_at,
                account_id: state.account_id,
            }
        };
        self.backend.store().upsert_heartbeat(&snapshot).await
    }
}
