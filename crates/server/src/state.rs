// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tickerflow_core::{
    AdmissionController, BatchOrchestrator, CreditLedger, IdentityResolver, PricingTable,
    ProgressStore, SharedPricing, SymbolAnalyzer,
};

/// Shared application state accessible from all route handlers.
///
/// The interactive handlers only ever poll, submit, or cancel; the
/// orchestration loops run on their own tokio tasks and touch nothing a
/// handler owns directly - all sharing goes through the progress store and
/// the credit ledger.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Batch scheduler; owns the background tasks and the event channel.
    pub orchestrator: Arc<BatchOrchestrator>,
    /// Cost quoting + credit debit.
    pub admission: Arc<AdmissionController>,
    /// Per-user credit balances.
    pub ledger: Arc<CreditLedger>,
    /// Owner-checked snapshot lookup for pollers.
    pub resolver: IdentityResolver,
}

impl AppState {
    /// Wire up the full core with the given analyzer and pricing table,
    /// wrapped in an Arc for sharing.
    pub fn new(
        analyzer: Arc<dyn SymbolAnalyzer>,
        pricing: PricingTable,
        inter_job_delay: Duration,
    ) -> Arc<Self> {
        let store = Arc::new(ProgressStore::new());
        let ledger = Arc::new(CreditLedger::new());
        let admission = Arc::new(AdmissionController::new(
            Arc::clone(&ledger),
            Arc::new(SharedPricing::new(pricing)),
        ));
        let orchestrator = Arc::new(BatchOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&admission),
            analyzer,
            inter_job_delay,
        ));

        Arc::new(Self {
            start_time: Instant::now(),
            orchestrator,
            admission,
            ledger,
            resolver: IdentityResolver::new(store),
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
