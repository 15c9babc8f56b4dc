// crates/core/src/store.rs
//! Concurrency-safe progress table, keyed by batch id.
//!
//! One writer per batch (the orchestration task), bursty readers (pollers).
//! A single table-wide mutex is sufficient at that contention level; readers
//! get deep copies so they never observe a record mid-mutation and never
//! hold the lock for longer than the copy.
//!
//! Every mutator except `init` is a silent no-op on an unknown batch id: the
//! writer runs on a background task where an unhandled fault would both be
//! invisible to the user and abort orchestration of later jobs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tickerflow_types::{BatchId, BatchPhase, BatchSummary, JobResult, ProgressSnapshot};

use crate::error::StoreError;

/// Partial field update for a running batch.
#[derive(Debug, Default, Clone)]
pub struct ProgressUpdate {
    pub current_job_index: Option<usize>,
    pub current_symbol: Option<String>,
    pub fraction_complete: Option<f64>,
    pub status_text: Option<String>,
}

/// In-memory table of per-batch progress records.
#[derive(Default)]
pub struct ProgressStore {
    batches: Mutex<HashMap<String, ProgressSnapshot>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ProgressSnapshot>> {
        match self.batches.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("progress store mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Create the Pending record for a freshly admitted batch.
    ///
    /// Fails on an existing id rather than overwriting: ids embed a random
    /// component plus a timestamp, so a collision is a caller bug, not an
    /// idempotent restart.
    pub fn init(&self, batch_id: &BatchId, total_jobs: usize) -> Result<(), StoreError> {
        let mut batches = self.lock();
        if batches.contains_key(batch_id.as_str()) {
            return Err(StoreError::BatchExists {
                batch_id: batch_id.to_string(),
            });
        }
        batches.insert(
            batch_id.as_str().to_string(),
            ProgressSnapshot::new(batch_id.clone(), total_jobs),
        );
        Ok(())
    }

    /// Transition Pending -> Running. No-op once terminal.
    pub fn set_running(&self, batch_id: &BatchId) {
        self.mutate(batch_id, |snap| {
            if snap.phase == BatchPhase::Pending {
                snap.phase = BatchPhase::Running;
                snap.status_text = "running".to_string();
            }
        });
    }

    /// Apply a partial update. `fraction_complete` is clamped to [0, 1] and
    /// never allowed to move backwards while the batch is running.
    pub fn update_progress(&self, batch_id: &BatchId, update: ProgressUpdate) {
        self.mutate(batch_id, |snap| {
            if let Some(index) = update.current_job_index {
                snap.current_job_index = index;
            }
            if let Some(symbol) = update.current_symbol {
                snap.current_symbol = symbol;
            }
            if let Some(fraction) = update.fraction_complete {
                snap.fraction_complete = fraction.clamp(0.0, 1.0).max(snap.fraction_complete);
            }
            if let Some(status) = update.status_text {
                snap.status_text = status;
            }
        });
    }

    /// Append a terminal per-job outcome. Append-only: readers always see a
    /// consistent prefix in submission order.
    pub fn append_completed(&self, batch_id: &BatchId, result: JobResult) {
        self.mutate(batch_id, |snap| {
            snap.completed_jobs.push(result);
        });
    }

    /// Terminal success for the whole batch. Freezes the record.
    ///
    /// A cancelled batch keeps its last fraction and says so in the status
    /// text; a full run reads 1.0.
    pub fn mark_completed(&self, batch_id: &BatchId, summary: BatchSummary) {
        self.mutate(batch_id, |snap| {
            snap.phase = BatchPhase::Completed;
            snap.status_text = if summary.cancelled {
                format!(
                    "cancelled: {}/{} succeeded, {} failed, {} skipped",
                    summary.succeeded, summary.total_jobs, summary.failed, summary.skipped
                )
            } else {
                format!(
                    "completed: {}/{} succeeded, {} failed",
                    summary.succeeded, summary.total_jobs, summary.failed
                )
            };
            if !summary.cancelled {
                snap.fraction_complete = 1.0;
            }
            snap.summary = Some(summary);
        });
    }

    /// Terminal orchestrator fault. Freezes the record.
    pub fn mark_failed(&self, batch_id: &BatchId, error: &str) {
        self.mutate(batch_id, |snap| {
            snap.phase = BatchPhase::Failed;
            snap.status_text = format!("failed: {error}");
        });
    }

    /// Deep copy of the current record, if one exists.
    pub fn snapshot(&self, batch_id: &BatchId) -> Option<ProgressSnapshot> {
        self.lock().get(batch_id.as_str()).cloned()
    }

    /// Number of tracked batches.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn mutate(&self, batch_id: &BatchId, f: impl FnOnce(&mut ProgressSnapshot)) {
        let mut batches = self.lock();
        let Some(snap) = batches.get_mut(batch_id.as_str()) else {
            // Unknown id: the batch may have been evicted by retention.
            return;
        };
        if snap.phase.is_terminal() {
            return;
        }
        f(snap);
        snap.last_updated_at = Utc::now();
    }
}
