//! OCR pool manager: capacity split and rebalancing

use crate::backend::BackendSet;
use crate::config::{OcrPoolSettings, Timeouts};
use crate::engines::OcrEngine;
use crate::error::StoreError;
use crate::jobs::OcrMode;
use crate::ocr::OcrWorker;
use crate::shutdown::ShutdownListener;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Initial mode split: floor(P/2) per mode, remainder to index, clamped to
/// the minimums.
pub fn initial_allocation(pool_size: usize, min_index: usize, min_acte: usize) -> (usize, usize) {
    debug_assert!(pool_size >= min_index + min_acte);
    let mut index = pool_size / 2 + pool_size % 2;
    let mut acte = pool_size - index;
    if acte < min_acte {
        acte = min_acte;
        index = pool_size - acte;
    }
    if index < min_index {
        index = min_index;
        acte = pool_size - index;
    }
    (index, acte)
}

/// Target split for the observed backlogs.
///
/// Returns `None` when both backlogs are empty: with nothing pending there is
/// no signal, so the current split stands. Targets are computed from
/// unlocked backlog snapshots; parallel pool managers may briefly disagree,
/// which is accepted drift.
pub fn rebalance_target(
    pool_size: usize,
    min_index: usize,
    min_acte: usize,
    backlog_index: i64,
    backlog_acte: i64,
) -> Option<(usize, usize)> {
    let total = backlog_index + backlog_acte;
    if total <= 0 {
        return None;
    }
    let flexible = pool_size.saturating_sub(min_index + min_acte);
    let share = backlog_index.max(0) as f64 / total as f64;
    let mut index = min_index + (flexible as f64 * share).round() as usize;
    index = index.min(pool_size - min_acte).max(min_index);
    Some((index, pool_size - index))
}

/// Owns the OCR workers and their mode controls
pub struct OcrPoolManager {
    backends: Arc<BackendSet>,
    engine: Arc<dyn OcrEngine>,
    settings: OcrPoolSettings,
    timeouts: Timeouts,
}

impl OcrPoolManager {
    pub fn new(
        backends: Arc<BackendSet>,
        engine: Arc<dyn OcrEngine>,
        settings: OcrPoolSettings,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            backends,
            engine,
            settings,
            timeouts,
        }
    }

    /// Spawn the pool and rebalance until shutdown; joins every worker
    /// before returning.
    pub async fn run(&self, mut shutdown: ShutdownListener) {
        let (index_count, acte_count) = initial_allocation(
            self.settings.pool_size,
            self.settings.min_index,
            self.settings.min_acte,
        );
        info!(
            pool_size = self.settings.pool_size,
            index_workers = index_count,
            acte_workers = acte_count,
            "starting ocr pool"
        );

        let mut handles = Vec::with_capacity(self.settings.pool_size);
        let mut controls: Vec<watch::Sender<OcrMode>> = Vec::with_capacity(self.settings.pool_size);

        for slot in 0..self.settings.pool_size {
            let mode = if slot < index_count {
                OcrMode::Index
            } else {
                OcrMode::Acte
            };
            let (tx, rx) = watch::channel(mode);
            let worker = OcrWorker::new(
                self.backends.clone(),
                self.engine.clone(),
                self.timeouts.clone(),
            );
            let listener = shutdown.clone();
            handles.push(tokio::spawn(async move { worker.run(rx, listener).await }));
            controls.push(tx);
        }

        let mut ticker = tokio::time::interval(self.timeouts.rebalance_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; consume it so the initial
        // allocation stands for one full interval.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.rebalance(&controls).await,
                _ = shutdown.cancelled() => break,
            }
        }

        futures::future::join_all(handles).await;
        info!("ocr pool stopped");
    }

    /// One rebalance pass over the mode controls
    async fn rebalance(&self, controls: &[watch::Sender<OcrMode>]) {
        let (backlog_index, backlog_acte) = self.backlogs().await;
        let Some((target_index, target_acte)) = rebalance_target(
            self.settings.pool_size,
            self.settings.min_index,
            self.settings.min_acte,
            backlog_index,
            backlog_acte,
        ) else {
            return;
        };

        let current_index = controls
            .iter()
            .filter(|tx| *tx.borrow() == OcrMode::Index)
            .count();
        if current_index == target_index {
            return;
        }

        info!(
            backlog_index,
            backlog_acte,
            current_index,
            target_index,
            target_acte,
            "rebalancing ocr pool; excess workers drain at their next job boundary"
        );

        if current_index < target_index {
            let mut to_flip = target_index - current_index;
            for tx in controls {
                if to_flip == 0 {
                    break;
                }
                if *tx.borrow() == OcrMode::Acte {
                    let _ = tx.send(OcrMode::Index);
                    to_flip -= 1;
                }
            }
        } else {
            let mut to_flip = current_index - target_index;
            for tx in controls {
                if to_flip == 0 {
                    break;
                }
                if *tx.borrow() == OcrMode::Index {
                    let _ = tx.send(OcrMode::Acte);
                    to_flip -= 1;
                }
            }
        }
    }

    /// Pending OCR backlog per mode across every OCR-enabled backend
    async fn backlogs(&self) -> (i64, i64) {
        let mut backlog_index = 0i64;
        let mut backlog_acte = 0i64;

        for backend in self.backends.ocr_backends() {
            if backend.schema_gate().is_tripped("ocr") {
                continue;
            }
            for (mode, total) in [
                (OcrMode::Index, &mut backlog_index),
                (OcrMode::Acte, &mut backlog_acte),
            ] {
                match backend.store().count_ocr_backlog(mode).await {
                    Ok(count) => *total += count,
                    Err(StoreError::Schema(message)) => {
                        if backend.schema_gate().trip("ocr") {
                            debug!(
                                backend = %backend.name(),
                                message,
                                "backend lacks ocr columns; treated as ocr-disabled for this process"
                            );
                        }
                        break;
                    }
                    Err(e) => {
                        warn!(backend = %backend.name(), mode = %mode, error = %e, "ocr backlog count failed");
                    }
                }
            }
        }
        (backlog_index, backlog_acte)
    }
}
