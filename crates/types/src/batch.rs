// crates/types/src/batch.rs
//! Batch identity and progress record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier for one submitted batch.
///
/// Format: `batch_{user}_{uuid8}_{YYYYMMDD_HHMMSS}`. The owning user is
/// embedded as a prefix so ownership can be checked without a lookup table.
/// User ids must not contain `_` (enforced at submission) so the prefix
/// check cannot be confused by a user id that extends another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    /// Generate a fresh id owned by `user_id`.
    pub fn generate(user_id: &str) -> Self {
        let random = uuid::Uuid::new_v4().simple().to_string();
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        Self(format!("batch_{}_{}_{}", user_id, &random[..8], stamp))
    }

    /// Wrap an externally-supplied id without validation.
    ///
    /// Resolution treats unparseable ids as not-owned, so a garbage id can
    /// never resolve to another user's batch.
    pub fn from_string(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// True when this id is prefixed with `user_id`'s identity.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        if user_id.is_empty() || user_id.contains('_') {
            return false;
        }
        self.0
            .strip_prefix("batch_")
            .map(|rest| rest.starts_with(&format!("{user_id}_")))
            .unwrap_or(false)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle phase of a batch.
///
/// Moves only forward: Pending -> Running -> {Completed, Failed}. Failed
/// means the orchestrator itself faulted, not that an individual job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Pending,
    Running,
    Completed,
    Failed,
}

impl BatchPhase {
    /// Terminal phases freeze the progress record.
    pub fn is_terminal(self) -> bool {
        matches!(self, BatchPhase::Completed | BatchPhase::Failed)
    }
}

/// One unit of work: analyze one symbol.
///
/// `params` is an opaque blob passed through to the analyzer unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub symbol: String,
    /// 0-based ordinal; defines execution order within the batch.
    pub position: usize,
    /// Trading date under analysis, `YYYY-MM-DD`.
    pub analysis_date: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Terminal outcome of one job. Exactly one of `payload`/`error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub symbol: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_seconds: f64,
    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    pub fn succeeded(
        symbol: impl Into<String>,
        payload: serde_json::Value,
        duration_seconds: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            success: true,
            payload: Some(payload),
            error: None,
            duration_seconds,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        symbol: impl Into<String>,
        error: impl Into<String>,
        duration_seconds: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            success: false,
            payload: None,
            error: Some(error.into()),
            duration_seconds,
            finished_at: Utc::now(),
        }
    }
}

/// Final statistics for a finished batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_jobs: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs never run because the batch was cancelled first.
    pub skipped: usize,
    /// True when cancellation cut the run short.
    pub cancelled: bool,
    /// succeeded / total_jobs, in [0, 1]. Zero for an all-failed batch.
    pub success_rate: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_duration_seconds: f64,
}

/// The single mutable progress record per batch.
///
/// Written only by the orchestration task; read (as a deep copy) by any
/// number of pollers. Invariant: `completed_jobs.len() <= current_job_index
/// <= total_jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub batch_id: BatchId,
    pub phase: BatchPhase,
    /// 0 while idle, N while the N-th job (1-based) is active.
    pub current_job_index: usize,
    pub total_jobs: usize,
    pub current_symbol: String,
    /// Overall completion in [0, 1]; non-decreasing while running.
    pub fraction_complete: f64,
    pub status_text: String,
    /// Append-only while running; a reader always sees a consistent prefix.
    pub completed_jobs: Vec<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<BatchSummary>,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// Fresh Pending record for a just-admitted batch.
    pub fn new(batch_id: BatchId, total_jobs: usize) -> Self {
        let now = Utc::now();
        Self {
            batch_id,
            phase: BatchPhase::Pending,
            current_job_index: 0,
            total_jobs,
            current_symbol: String::new(),
            fraction_complete: 0.0,
            status_text: "pending".to_string(),
            completed_jobs: Vec::new(),
            summary: None,
            started_at: now,
            last_updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_batch_id_embeds_owner() {
        let id = BatchId::generate("alice");
        assert!(id.as_str().starts_with("batch_alice_"));
        assert!(id.is_owned_by("alice"));
        assert!(!id.is_owned_by("bob"));
    }

    #[test]
    fn test_batch_id_prefix_is_exact() {
        let id = BatchId::generate("al");
        // "a" is a prefix of "al" but does not own the batch.
        assert!(!id.is_owned_by("a"));
        assert!(id.is_owned_by("al"));
    }

    #[test]
    fn test_batch_id_rejects_garbage() {
        let id = BatchId::from_string("not-a-batch-id");
        assert!(!id.is_owned_by("alice"));
        assert!(!id.is_owned_by(""));
    }

    #[test]
    fn test_batch_id_unique() {
        let a = BatchId::generate("alice");
        let b = BatchId::generate("alice");
        assert_ne!(a, b);
    }

    #[test]
    fn test_phase_terminal() {
        assert!(!BatchPhase::Pending.is_terminal());
        assert!(!BatchPhase::Running.is_terminal());
        assert!(BatchPhase::Completed.is_terminal());
        assert!(BatchPhase::Failed.is_terminal());
    }

    #[test]
    fn test_job_result_constructors() {
        let ok = JobResult::succeeded("AAPL", serde_json::json!({"action": "buy"}), 12.5);
        assert!(ok.success);
        assert!(ok.payload.is_some());
        assert!(ok.error.is_none());

        let bad = JobResult::failed("TSLA", "rate limited", 3.0);
        assert!(!bad.success);
        assert!(bad.payload.is_none());
        assert_eq!(bad.error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let snap = ProgressSnapshot::new(BatchId::from_string("batch_u_x_y"), 3);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"currentJobIndex\":0"));
        assert!(json.contains("\"totalJobs\":3"));
        assert!(json.contains("\"phase\":\"pending\""));
        // summary is None and skipped
        assert!(!json.contains("summary"));
    }
}
