// crates/core/src/orchestrator.rs
//! The batch scheduler: admit, then run jobs strictly in order on a
//! background task, updating the progress store before/during/after each
//! job and broadcasting typed events for streaming observers.
//!
//! One spawned task per batch; batches never share mutable state beyond the
//! store (keyed by batch id) and the credit ledger (debited before spawn).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use tickerflow_types::{BatchId, BatchSummary, JobSpec, ProgressEvent, ProgressSnapshot};

use crate::admission::AdmissionController;
use crate::error::{ResolveError, SubmitError};
use crate::runner::{fine_progress, run_job, ProgressFn, SymbolAnalyzer};
use crate::store::{ProgressStore, ProgressUpdate};

/// Capacity of the progress event broadcast channel. Slow SSE subscribers
/// lag and drop rather than blocking the orchestration task.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One batch submission.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub user_id: String,
    /// Symbols in execution order. Duplicates are allowed and run as
    /// independent jobs; callers keying results by symbol see last-wins.
    pub symbols: Vec<String>,
    pub research_depth: u8,
    pub provider: String,
    pub model: String,
    /// Trading date under analysis, `YYYY-MM-DD`. Defaults to today (UTC).
    pub analysis_date: Option<String>,
    /// Opaque per-job parameters, passed through to the analyzer unchanged.
    pub params: serde_json::Value,
}

/// Successful admission: the id to poll, what it cost, what is left.
#[derive(Debug, Clone)]
pub struct Admitted {
    pub batch_id: BatchId,
    pub cost: u64,
    pub remaining_credits: u64,
}

/// Sequential per-batch scheduler.
pub struct BatchOrchestrator {
    store: Arc<ProgressStore>,
    admission: Arc<AdmissionController>,
    analyzer: Arc<dyn SymbolAnalyzer>,
    /// Pacing delay between consecutive jobs, to respect external rate
    /// limits. Not a correctness requirement.
    inter_job_delay: Duration,
    events_tx: broadcast::Sender<ProgressEvent>,
    cancellations: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<ProgressStore>,
        admission: Arc<AdmissionController>,
        analyzer: Arc<dyn SymbolAnalyzer>,
        inter_job_delay: Duration,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            admission,
            analyzer,
            inter_job_delay,
            events_tx,
            cancellations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to progress events from all batches (for SSE streaming).
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events_tx.subscribe()
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    /// Validate, quote, debit, create the Pending record, and spawn the
    /// sequential loop. On rejection nothing is created and nothing is
    /// debited; the error is surfaced synchronously to the submitter.
    pub fn submit(&self, request: SubmitRequest) -> Result<Admitted, SubmitError> {
        let jobs = validate(&request)?;

        let cost = self.admission.quote(
            request.research_depth,
            &request.provider,
            &request.model,
            jobs.len(),
        );
        let remaining_credits = self.admission.try_admit(&request.user_id, cost)?;

        let batch_id = BatchId::generate(&request.user_id);
        if let Err(err) = self.store.init(&batch_id, jobs.len()) {
            // Debit already happened; give it back before surfacing the
            // collision (practically unreachable with generated ids).
            self.admission.ledger().grant(&request.user_id, cost);
            return Err(err.into());
        }

        let token = CancellationToken::new();
        lock_cancellations(&self.cancellations)
            .insert(batch_id.as_str().to_string(), token.clone());

        tracing::info!(
            batch_id = %batch_id,
            user_id = %request.user_id,
            jobs = jobs.len(),
            cost,
            "batch submitted"
        );

        let store = Arc::clone(&self.store);
        let analyzer = Arc::clone(&self.analyzer);
        let events_tx = self.events_tx.clone();
        let cancellations = Arc::clone(&self.cancellations);
        let delay = self.inter_job_delay;
        let id = batch_id.clone();
        tokio::spawn(async move {
            run_batch(store, analyzer, events_tx, id.clone(), jobs, delay, token).await;
            lock_cancellations(&cancellations).remove(id.as_str());
        });

        Ok(Admitted {
            batch_id,
            cost,
            remaining_credits,
        })
    }

    /// Best-effort cancellation: remaining jobs are skipped at the next
    /// iteration boundary; the job currently inside the analyzer is not
    /// interrupted. Returns true when a running batch was signalled.
    pub fn cancel(&self, user_id: &str, batch_id: &BatchId) -> Result<bool, ResolveError> {
        if !batch_id.is_owned_by(user_id) {
            return Err(ResolveError::Forbidden);
        }
        if let Some(token) = lock_cancellations(&self.cancellations).get(batch_id.as_str()) {
            token.cancel();
            tracing::info!(batch_id = %batch_id, "batch cancellation requested");
            return Ok(true);
        }
        // Not running; distinguish finished from never-existed.
        match self.store.snapshot(batch_id) {
            Some(_) => Ok(false),
            None => Err(ResolveError::NotFound),
        }
    }
}

fn lock_cancellations(
    map: &Mutex<HashMap<String, CancellationToken>>,
) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
    match map.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("cancellation map mutex poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Admission-time validation. An empty job list never reaches the store.
fn validate(request: &SubmitRequest) -> Result<Vec<JobSpec>, SubmitError> {
    if request.user_id.trim().is_empty() {
        return Err(SubmitError::InvalidUserId {
            user_id: request.user_id.clone(),
            reason: "empty".to_string(),
        });
    }
    // Underscores would make the batch-id ownership prefix ambiguous.
    if request.user_id.contains('_') {
        return Err(SubmitError::InvalidUserId {
            user_id: request.user_id.clone(),
            reason: "must not contain '_'".to_string(),
        });
    }
    if request.symbols.is_empty() {
        return Err(SubmitError::EmptyBatch);
    }

    let analysis_date = match &request.analysis_date {
        Some(raw) => {
            let value = raw.trim();
            if chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").is_err() {
                return Err(SubmitError::InvalidAnalysisDate {
                    value: raw.clone(),
                });
            }
            value.to_string()
        }
        None => Utc::now().format("%Y-%m-%d").to_string(),
    };

    request
        .symbols
        .iter()
        .enumerate()
        .map(|(position, raw)| {
            let symbol = raw.trim();
            if symbol.is_empty() || symbol.contains(char::is_whitespace) {
                return Err(SubmitError::InvalidSymbol {
                    position,
                    symbol: raw.clone(),
                });
            }
            Ok(JobSpec {
                symbol: symbol.to_string(),
                position,
                analysis_date: analysis_date.clone(),
                params: request.params.clone(),
            })
        })
        .collect()
}

/// The sequential loop. Runs on its own task; per-job faults are absorbed
/// by the runner adapter, so the only path to phase Failed is a fault in
/// the scheduling machinery itself.
async fn run_batch(
    store: Arc<ProgressStore>,
    analyzer: Arc<dyn SymbolAnalyzer>,
    events_tx: broadcast::Sender<ProgressEvent>,
    batch_id: BatchId,
    jobs: Vec<JobSpec>,
    inter_job_delay: Duration,
    token: CancellationToken,
) {
    let total_jobs = jobs.len();
    let batch_start = Instant::now();
    store.set_running(&batch_id);

    let mut cancelled = false;
    for job in jobs {
        let index = job.position + 1;
        if token.is_cancelled() {
            cancelled = true;
            break;
        }

        let symbol = job.symbol.clone();
        store.update_progress(
            &batch_id,
            ProgressUpdate {
                current_job_index: Some(index),
                current_symbol: Some(symbol.clone()),
                fraction_complete: Some((index - 1) as f64 / total_jobs as f64),
                status_text: Some(format!("starting {symbol} ({index}/{total_jobs})")),
            },
        );
        send(
            &events_tx,
            ProgressEvent::JobStarted {
                batch_id: batch_id.clone(),
                symbol: symbol.clone(),
                current_index: index,
                total_jobs,
            },
        );

        // Overall fraction = (finished jobs + fine progress of the current
        // one) / total.
        let progress: ProgressFn = {
            let store = Arc::clone(&store);
            let events_tx = events_tx.clone();
            let batch_id = batch_id.clone();
            let symbol = symbol.clone();
            Arc::new(move |message, step, total_steps| {
                let fraction =
                    ((index - 1) as f64 + fine_progress(step, total_steps)) / total_jobs as f64;
                store.update_progress(
                    &batch_id,
                    ProgressUpdate {
                        fraction_complete: Some(fraction),
                        status_text: Some(message.to_string()),
                        ..Default::default()
                    },
                );
                send(
                    &events_tx,
                    ProgressEvent::JobProgress {
                        batch_id: batch_id.clone(),
                        symbol: symbol.clone(),
                        message: message.to_string(),
                        step,
                        total_steps,
                        fraction_complete: fraction,
                    },
                );
            })
        };

        let result = run_job(Arc::clone(&analyzer), job, progress).await;
        send(
            &events_tx,
            ProgressEvent::JobCompleted {
                batch_id: batch_id.clone(),
                symbol: result.symbol.clone(),
                success: result.success,
                error: result.error.clone(),
                duration_seconds: result.duration_seconds,
                current_index: index,
                total_jobs,
            },
        );
        store.append_completed(&batch_id, result);

        if index < total_jobs && !inter_job_delay.is_zero() {
            let wait_seconds = inter_job_delay.as_secs();
            let message = format!("waiting {wait_seconds}s before next job");
            store.update_progress(
                &batch_id,
                ProgressUpdate {
                    status_text: Some(message.clone()),
                    ..Default::default()
                },
            );
            send(
                &events_tx,
                ProgressEvent::Waiting {
                    batch_id: batch_id.clone(),
                    message,
                    wait_seconds,
                },
            );
            tokio::select! {
                _ = token.cancelled() => {
                    // Picked up by the check at the top of the next
                    // iteration.
                }
                _ = tokio::time::sleep(inter_job_delay) => {}
            }
        }
    }

    // Assemble the summary from what actually ran. If the record vanished
    // under us (retention raced the loop), the batch can only be marked
    // failed - and on an evicted record even that is a no-op.
    let Some(snapshot) = store.snapshot(&batch_id) else {
        tracing::error!(batch_id = %batch_id, "progress record missing at completion");
        store.mark_failed(&batch_id, "progress record missing at completion");
        send(
            &events_tx,
            ProgressEvent::BatchFailed {
                batch_id,
                error: "progress record missing at completion".to_string(),
            },
        );
        return;
    };

    let summary = summarize(&snapshot, batch_start.elapsed(), cancelled);
    tracing::info!(
        batch_id = %batch_id,
        total = summary.total_jobs,
        succeeded = summary.succeeded,
        failed = summary.failed,
        cancelled,
        duration_secs = summary.total_duration_seconds,
        "batch finished"
    );
    store.mark_completed(&batch_id, summary.clone());
    send(
        &events_tx,
        ProgressEvent::BatchCompleted { batch_id, summary },
    );
}

fn summarize(snapshot: &ProgressSnapshot, elapsed: Duration, cancelled: bool) -> BatchSummary {
    let succeeded = snapshot.completed_jobs.iter().filter(|r| r.success).count();
    let failed = snapshot.completed_jobs.len() - succeeded;
    BatchSummary {
        total_jobs: snapshot.total_jobs,
        succeeded,
        failed,
        skipped: snapshot.total_jobs - snapshot.completed_jobs.len(),
        cancelled,
        success_rate: succeeded as f64 / snapshot.total_jobs.max(1) as f64,
        started_at: snapshot.started_at,
        finished_at: Utc::now(),
        total_duration_seconds: elapsed.as_secs_f64(),
    }
}

fn send(events_tx: &broadcast::Sender<ProgressEvent>, event: ProgressEvent) {
    // No subscribers is fine.
    let _ = events_tx.send(event);
}
