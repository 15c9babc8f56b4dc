// crates/server/src/lib.rs
//! Tickerflow server library.
//!
//! Axum-based HTTP surface over the batch orchestration core: submit a
//! batch of symbol-analysis jobs, poll or stream its progress, manage
//! credits and pricing. The orchestration loops run on background tasks;
//! request handlers never block on job completion.

pub mod error;
pub mod routes;
pub mod state;

pub use error::*;
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, batches, credits, pricing)
/// - CORS for development (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Integration Tests
// ============================================================================
