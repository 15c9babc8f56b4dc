// crates/server/src/routes/pricing.rs
//! API routes for the pricing table.
//!
//! - GET /pricing - The table currently in effect
//! - PUT /pricing/models - Insert or replace one model surcharge
//! - DELETE /pricing/models - Remove one model surcharge
//! - PUT /pricing/toggles - Flip the depth/model charge toggles
//!
//! Every edit clones the current table, mutates the clone, and swaps the
//! whole table atomically - a concurrent quote sees either the old or the
//! new table, never a half-edited one.

use axum::extract::State;
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

use tickerflow_core::{ModelCost, PricingTable};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelKey {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TogglesRequest {
    pub charge_depth: bool,
    pub charge_model: bool,
}

/// GET /api/pricing - the table currently in effect.
async fn get_pricing(State(state): State<Arc<AppState>>) -> Json<PricingTable> {
    Json((*state.admission.pricing()).clone())
}

/// PUT /api/pricing/models - insert or replace a model surcharge.
async fn put_model_cost(
    State(state): State<Arc<AppState>>,
    Json(entry): Json<ModelCost>,
) -> ApiResult<Json<PricingTable>> {
    if entry.provider.trim().is_empty() || entry.model.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "provider and model must be non-empty".to_string(),
        ));
    }
    let mut table = (*state.admission.pricing()).clone();
    table.set_model_cost(&entry.provider, &entry.model, entry.cost);
    state.admission.reload_pricing(table);
    Ok(Json((*state.admission.pricing()).clone()))
}

/// DELETE /api/pricing/models - remove a model surcharge entry.
async fn delete_model_cost(
    State(state): State<Arc<AppState>>,
    Json(key): Json<ModelKey>,
) -> ApiResult<Json<PricingTable>> {
    let mut table = (*state.admission.pricing()).clone();
    if !table.remove_model_cost(&key.provider, &key.model) {
        return Err(ApiError::BadRequest(format!(
            "no pricing entry for {}/{}",
            key.provider, key.model
        )));
    }
    state.admission.reload_pricing(table);
    Ok(Json((*state.admission.pricing()).clone()))
}

/// PUT /api/pricing/toggles - enable/disable the two cost components.
async fn put_toggles(
    State(state): State<Arc<AppState>>,
    Json(toggles): Json<TogglesRequest>,
) -> Json<PricingTable> {
    let mut table = (*state.admission.pricing()).clone();
    table.charge_depth = toggles.charge_depth;
    table.charge_model = toggles.charge_model;
    state.admission.reload_pricing(table);
    Json((*state.admission.pricing()).clone())
}

/// Build the pricing router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/pricing", get(get_pricing))
        .route("/pricing/models", put(put_model_cost))
        .route("/pricing/models", delete(delete_model_cost))
        .route("/pricing/toggles", put(put_toggles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tickerflow_core::SimulatedAnalyzer;
    use tower::ServiceExt;

    fn app_with_state() -> (Router, Arc<AppState>) {
        let state = AppState::new(
            Arc::new(SimulatedAnalyzer::new(Duration::ZERO)),
            PricingTable::default(),
            Duration::ZERO,
        );
        let app = Router::new()
            .nest("/api", router())
            .with_state(Arc::clone(&state));
        (app, state)
    }

    async fn table_from(response: axum::response::Response) -> PricingTable {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_get_pricing() {
        let (app, _) = app_with_state();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/pricing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let table = table_from(response).await;
        assert!(table.charge_depth);
    }

    #[tokio::test]
    async fn test_put_model_cost_changes_quotes() {
        let (app, state) = app_with_state();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/pricing/models")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"provider": "acme", "model": "frontier-1", "cost": 7}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        // depth 1 (1) + frontier-1 (7) = 8 per job
        assert_eq!(state.admission.quote(1, "acme", "frontier-1", 1), 8);
    }

    #[tokio::test]
    async fn test_delete_unknown_model_cost_rejected() {
        let (app, _) = app_with_state();
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/pricing/models")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"provider": "acme", "model": "ghost"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_put_toggles_makes_analysis_free() {
        let (app, state) = app_with_state();
        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/pricing/toggles")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"chargeDepth": false, "chargeModel": false}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.admission.quote(5, "openai", "gpt-4o", 10), 0);
    }
}
