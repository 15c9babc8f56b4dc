// crates/server/src/routes/credits.rs
//! API routes for credit balances.
//!
//! - GET  /credits/{user_id} - Current balance
//! - POST /credits/{user_id}/grant - Add credits (admin surface)

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct BalanceResponse {
    pub user_id: String,
    pub balance: u64,
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub amount: u64,
}

/// GET /api/credits/{user_id} - current balance (zero for unknown users).
async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Json<BalanceResponse> {
    Json(BalanceResponse {
        balance: state.ledger.balance(&user_id),
        user_id,
    })
}

/// POST /api/credits/{user_id}/grant - add credits.
async fn grant_credits(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(request): Json<GrantRequest>,
) -> ApiResult<Json<BalanceResponse>> {
    if request.amount == 0 {
        return Err(ApiError::BadRequest("grant amount must be positive".to_string()));
    }
    let balance = state.ledger.grant(&user_id, request.amount);
    tracing::info!(user_id = %user_id, amount = request.amount, balance, "credits granted");
    Ok(Json(BalanceResponse { user_id, balance }))
}

/// Build the credits router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/credits/{user_id}", get(get_balance))
        .route("/credits/{user_id}/grant", post(grant_credits))
}
