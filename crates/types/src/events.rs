// crates/types/src/events.rs
//! Typed progress events broadcast during batch execution.
//!
//! A closed tagged enum instead of loosely-structured maps: every consumer
//! matches on the kind and gets a typed payload, no defensive field probing.

use serde::{Deserialize, Serialize};

use crate::batch::{BatchId, BatchSummary};

/// One progress notification from a running batch, streamed over SSE.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(rename_all_fields = "camelCase")]
pub enum ProgressEvent {
    /// The orchestrator is about to invoke the analyzer for one job.
    JobStarted {
        batch_id: BatchId,
        symbol: String,
        /// 1-based position of the job now starting.
        current_index: usize,
        total_jobs: usize,
    },
    /// Fine-grained progress from inside the running job.
    JobProgress {
        batch_id: BatchId,
        symbol: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_steps: Option<u32>,
        /// Overall batch completion in [0, 1].
        fraction_complete: f64,
    },
    /// One job reached a terminal outcome (success or failure).
    JobCompleted {
        batch_id: BatchId,
        symbol: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        duration_seconds: f64,
        current_index: usize,
        total_jobs: usize,
    },
    /// Pacing delay between jobs.
    Waiting {
        batch_id: BatchId,
        message: String,
        wait_seconds: u64,
    },
    /// The whole batch finished; every job has a recorded outcome.
    BatchCompleted {
        batch_id: BatchId,
        summary: BatchSummary,
    },
    /// The orchestrator itself faulted before finishing the loop.
    BatchFailed { batch_id: BatchId, error: String },
}

impl ProgressEvent {
    /// The batch this event belongs to, for per-batch stream filtering.
    pub fn batch_id(&self) -> &BatchId {
        match self {
            ProgressEvent::JobStarted { batch_id, .. }
            | ProgressEvent::JobProgress { batch_id, .. }
            | ProgressEvent::JobCompleted { batch_id, .. }
            | ProgressEvent::Waiting { batch_id, .. }
            | ProgressEvent::BatchCompleted { batch_id, .. }
            | ProgressEvent::BatchFailed { batch_id, .. } => batch_id,
        }
    }
}
