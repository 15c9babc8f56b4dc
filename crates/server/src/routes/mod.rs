// crates/server/src/routes/mod.rs
//! API route handlers for the tickerflow server.

pub mod batches;
pub mod credits;
pub mod health;
pub mod pricing;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router with all routes under /api prefix.
///
/// Routes:
/// - GET    /api/health - Health check
/// - POST   /api/batches - Submit a batch of analysis jobs
/// - GET    /api/batches/{batch_id} - Poll the progress snapshot
/// - GET    /api/batches/{batch_id}/stream - SSE stream of batch events
/// - POST   /api/batches/{batch_id}/cancel - Best-effort cancellation
/// - GET    /api/credits/{user_id} - Credit balance
/// - POST   /api/credits/{user_id}/grant - Add credits
/// - GET    /api/pricing - Current pricing table
/// - PUT    /api/pricing/models - Set a model surcharge
/// - DELETE /api/pricing/models - Remove a model surcharge
/// - PUT    /api/pricing/toggles - Flip cost component toggles
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", batches::router())
        .nest("/api", credits::router())
        .nest("/api", pricing::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tickerflow_core::{PricingTable, SimulatedAnalyzer};

    #[tokio::test]
    async fn test_api_routes_creation() {
        let state = AppState::new(
            Arc::new(SimulatedAnalyzer::new(Duration::ZERO)),
            PricingTable::default(),
            Duration::ZERO,
        );
        let _router = api_routes(state);
    }
}
