// crates/core/src/runner.rs
//! The external analysis boundary and its fault-absorbing adapter.
//!
//! `analyze` is arbitrarily long-running (seconds to tens of minutes) and
//! opaque. The adapter runs it on its own tokio task so that both `Err`
//! returns and panics surface as a failed [`JobResult`] instead of unwinding
//! into the orchestrator loop and aborting later, independent jobs.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tickerflow_types::{JobResult, JobSpec};

/// Fine-grained progress callback: (message, step, total_steps).
/// `step`/`total_steps` may be absent for coarse-grained jobs.
pub type ProgressFn = Arc<dyn Fn(&str, Option<u32>, Option<u32>) + Send + Sync>;

/// The external analysis routine: analyze one symbol, emitting progress
/// zero or more times along the way.
#[async_trait]
pub trait SymbolAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        spec: &JobSpec,
        progress: ProgressFn,
    ) -> Result<serde_json::Value, String>;
}

/// Clamp a step counter into a [0, 1] fine-progress fraction.
/// Absent or degenerate counters yield 0.
pub fn fine_progress(step: Option<u32>, total_steps: Option<u32>) -> f64 {
    match (step, total_steps) {
        (Some(step), Some(total)) if total > 0 => (step as f64 / total as f64).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

/// Run one job through the analyzer, absorbing every fault.
///
/// Returns a terminal [`JobResult`] in all cases: analyzer `Err`, analyzer
/// panic (caught as a `JoinError` on the dedicated task), or success.
pub async fn run_job(
    analyzer: Arc<dyn SymbolAnalyzer>,
    spec: JobSpec,
    progress: ProgressFn,
) -> JobResult {
    let symbol = spec.symbol.clone();
    let started = Instant::now();

    let task = {
        let analyzer = Arc::clone(&analyzer);
        tokio::spawn(async move { analyzer.analyze(&spec, progress).await })
    };

    let outcome = task.await;
    let duration = started.elapsed().as_secs_f64();

    match outcome {
        Ok(Ok(payload)) => {
            tracing::info!(symbol = %symbol, duration_secs = duration, "job succeeded");
            JobResult::succeeded(symbol, payload, duration)
        }
        Ok(Err(error)) => {
            tracing::warn!(symbol = %symbol, error = %error, duration_secs = duration, "job failed");
            JobResult::failed(symbol, error, duration)
        }
        Err(join_err) => {
            let error = if join_err.is_panic() {
                format!("analysis panicked: {join_err}")
            } else {
                format!("analysis task aborted: {join_err}")
            };
            tracing::error!(symbol = %symbol, error = %error, "job crashed");
            JobResult::failed(symbol, error, duration)
        }
    }
}

/// Canned analysis phases walked by the simulated analyzer.
const SIMULATED_PHASES: [&str; 5] = [
    "fetching market data",
    "analyzing fundamentals",
    "evaluating sentiment",
    "debating bull and bear cases",
    "forming trading decision",
];

/// Stand-in analyzer used by the binary when no real engine is wired in,
/// and by tests. Steps through the canned phases with a configurable delay.
///
/// A spec whose `params` contain `{"fail": "<message>"}`, or whose symbol is
/// in `fail_symbols`, fails after the first phase.
pub struct SimulatedAnalyzer {
    step_delay: Duration,
    fail_symbols: HashSet<String>,
}

impl SimulatedAnalyzer {
    pub fn new(step_delay: Duration) -> Self {
        Self {
            step_delay,
            fail_symbols: HashSet::new(),
        }
    }

    /// Mark symbols that should fail, for demos and tests.
    pub fn with_fail_symbols(mut self, symbols: impl IntoIterator<Item = String>) -> Self {
        self.fail_symbols = symbols.into_iter().collect();
        self
    }
}

#[async_trait]
impl SymbolAnalyzer for SimulatedAnalyzer {
    async fn analyze(
        &self,
        spec: &JobSpec,
        progress: ProgressFn,
    ) -> Result<serde_json::Value, String> {
        let total = SIMULATED_PHASES.len() as u32;
        for (i, phase) in SIMULATED_PHASES.iter().enumerate() {
            let step = i as u32 + 1;
            progress(
                &format!("{}: {phase}", spec.symbol),
                Some(step),
                Some(total),
            );
            if !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }

            if step == 1 {
                if let Some(message) = spec.params.get("fail").and_then(|v| v.as_str()) {
                    return Err(message.to_string());
                }
                if self.fail_symbols.contains(&spec.symbol) {
                    return Err(format!("simulated failure for {}", spec.symbol));
                }
            }
        }

        Ok(serde_json::json!({
            "symbol": spec.symbol,
            "analysisDate": spec.analysis_date,
            "decision": { "action": "hold", "confidence": 0.5 },
            "phases": total,
        }))
    }
}
