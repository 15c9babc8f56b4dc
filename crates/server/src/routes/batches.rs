// crates/server/src/routes/batches.rs
//! API routes for batch submission and observation.
//!
//! - POST /batches - Submit a batch of analysis jobs
//! - GET  /batches/{batch_id} - Poll the progress snapshot
//! - GET  /batches/{batch_id}/stream - SSE stream of this batch's events
//! - POST /batches/{batch_id}/cancel - Best-effort cancellation
//!
//! Authentication is out of scope; callers identify themselves with a
//! `userId` body field or `user_id` query parameter, and ownership is
//! enforced against the identity embedded in the batch id.

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use tickerflow_core::SubmitRequest;
use tickerflow_types::{BatchId, BatchPhase, ProgressEvent, ProgressSnapshot};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBatchRequest {
    pub user_id: String,
    pub symbols: Vec<String>,
    pub research_depth: u8,
    pub provider: String,
    pub model: String,
    /// `YYYY-MM-DD`; omitted means today (UTC).
    #[serde(default)]
    pub analysis_date: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct SubmitBatchResponse {
    pub batch_id: BatchId,
    pub cost: u64,
    pub remaining_credits: u64,
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct CancelResponse {
    /// True when a running batch was signalled; false when it had already
    /// finished.
    pub cancelled: bool,
}

/// POST /api/batches - validate, debit credits, start the batch.
async fn submit_batch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitBatchRequest>,
) -> ApiResult<Json<SubmitBatchResponse>> {
    let admitted = state
        .orchestrator
        .submit(SubmitRequest {
            user_id: request.user_id,
            symbols: request.symbols,
            research_depth: request.research_depth,
            provider: request.provider,
            model: request.model,
            analysis_date: request.analysis_date,
            params: request.params,
        })
        .map_err(ApiError::from)?;

    Ok(Json(SubmitBatchResponse {
        batch_id: admitted.batch_id,
        cost: admitted.cost,
        remaining_credits: admitted.remaining_credits,
    }))
}

/// GET /api/batches/{batch_id} - owner-checked progress snapshot.
///
/// Safe to call at any frequency; the snapshot is a deep copy.
async fn poll_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<ProgressSnapshot>> {
    let id = BatchId::from_string(&batch_id);
    let snapshot = state
        .resolver
        .resolve(&query.user_id, &id)
        .map_err(|e| ApiError::from_resolve(e, &batch_id))?;
    Ok(Json(snapshot))
}

/// The terminal event a reconnecting subscriber missed, rebuilt from the
/// frozen snapshot.
fn replay_terminal_event(snapshot: &ProgressSnapshot) -> Option<ProgressEvent> {
    match snapshot.phase {
        BatchPhase::Completed => {
            snapshot
                .summary
                .clone()
                .map(|summary| ProgressEvent::BatchCompleted {
                    batch_id: snapshot.batch_id.clone(),
                    summary,
                })
        }
        BatchPhase::Failed => Some(ProgressEvent::BatchFailed {
            batch_id: snapshot.batch_id.clone(),
            error: snapshot.status_text.clone(),
        }),
        BatchPhase::Pending | BatchPhase::Running => None,
    }
}

/// GET /api/batches/{batch_id}/stream - SSE stream of this batch's events.
///
/// Ownership is enforced before subscribing; the stream then filters the
/// global event channel down to this batch. Subscription happens before the
/// snapshot is taken, so a batch that reaches a terminal phase in between is
/// either replayed from the snapshot or delivered on the channel, never
/// dropped.
async fn stream_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let id = BatchId::from_string(&batch_id);
    let rx = state.orchestrator.subscribe();
    let snapshot = state
        .resolver
        .resolve(&query.user_id, &id)
        .map_err(|e| ApiError::from_resolve(e, &batch_id))?;

    let stream = async_stream::stream! {
        let mut rx = rx;

        // Already finished: replay the terminal outcome and close.
        if snapshot.phase.is_terminal() {
            if let Some(event) = replay_terminal_event(&snapshot) {
                let json = serde_json::to_string(&event).unwrap_or_default();
                yield Ok(Event::default().data(json));
            }
            return;
        }

        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                // A slow subscriber misses intermediate events but keeps
                // the stream; the terminal event still arrives.
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            if event.batch_id() != &id {
                continue;
            }
            let done = matches!(
                event,
                ProgressEvent::BatchCompleted { .. } | ProgressEvent::BatchFailed { .. }
            );
            let json = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().data(json));
            if done {
                break;
            }
        }
    };

    Ok(Sse::new(stream))
}

/// POST /api/batches/{batch_id}/cancel - skip remaining jobs.
async fn cancel_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<CancelResponse>> {
    let id = BatchId::from_string(&batch_id);
    let cancelled = state
        .orchestrator
        .cancel(&query.user_id, &id)
        .map_err(|e| ApiError::from_resolve(e, &batch_id))?;
    Ok(Json(CancelResponse { cancelled }))
}

/// Build the batches router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/batches", post(submit_batch))
        .route("/batches/{batch_id}", get(poll_batch))
        .route("/batches/{batch_id}/stream", get(stream_batch))
        .route("/batches/{batch_id}/cancel", post(cancel_batch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorResponse;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tickerflow_core::{PricingTable, SimulatedAnalyzer};
    use tickerflow_types::BatchPhase;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<AppState>) {
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

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn submit_body(user: &str, symbols: &[&str]) -> Body {
        Body::from(
            serde_json::json!({
                "userId": user,
                "symbols": symbols,
                "researchDepth": 1,
                "provider": "openai",
                "model": "gpt-4o-mini",
            })
            .to_string(),
        )
    }

    async fn submit(app: &Router, user: &str, symbols: &[&str]) -> axum::response::Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/batches")
                    .header("content-type", "application/json")
                    .body(submit_body(user, symbols))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn wait_completed(state: &AppState, user: &str, id: &BatchId) -> ProgressSnapshot {
        for _ in 0..200 {
            if let Ok(snap) = state.resolver.resolve(user, id) {
                if snap.phase.is_terminal() {
                    return snap;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("batch did not finish");
    }

    #[tokio::test]
    async fn test_submit_then_poll_roundtrip() {
        let (app, state) = app();
        state.ledger.grant("alice", 100);

        let response = submit(&app, "alice", &["AAPL", "TSLA"]).await;
        assert_eq!(response.status(), StatusCode::OK);
        let submitted: SubmitBatchResponse = body_json(response).await;
        // depth 1 (1) + gpt-4o-mini (1) = 2 per job, 2 jobs
        assert_eq!(submitted.cost, 4);
        assert_eq!(submitted.remaining_credits, 96);

        wait_completed(&state, "alice", &submitted.batch_id).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!(
                        "/api/batches/{}?user_id=alice",
                        submitted.batch_id
                    ))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snap: ProgressSnapshot = body_json(response).await;
        assert_eq!(snap.phase, BatchPhase::Completed);
        assert_eq!(snap.completed_jobs.len(), 2);
        assert_eq!(snap.completed_jobs[0].symbol, "AAPL");
        assert_eq!(snap.completed_jobs[1].symbol, "TSLA");
    }

    #[tokio::test]
    async fn test_submit_without_credits_returns_402() {
        let (app, state) = app();
        let response = submit(&app, "alice", &["AAPL"]).await;
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let err: ErrorResponse = body_json(response).await;
        assert_eq!(err.error, "Insufficient credits");
        // Nothing was created.
        assert_eq!(state.ledger.balance("alice"), 0);
    }

    #[tokio::test]
    async fn test_submit_empty_batch_returns_400() {
        let (app, state) = app();
        state.ledger.grant("alice", 100);
        let response = submit(&app, "alice", &[]).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_poll_foreign_batch_returns_403() {
        let (app, state) = app();
        state.ledger.grant("alice", 100);

        let submitted: SubmitBatchResponse =
            body_json(submit(&app, "alice", &["AAPL"]).await).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/batches/{}?user_id=bob", submitted.batch_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_poll_unknown_batch_returns_404() {
        let (app, _) = app();
        let ghost = BatchId::generate("alice");
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/batches/{ghost}?user_id=alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_finished_batch() {
        let (app, state) = app();
        state.ledger.grant("alice", 100);

        let submitted: SubmitBatchResponse =
            body_json(submit(&app, "alice", &["AAPL"]).await).await;
        wait_completed(&state, "alice", &submitted.batch_id).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!(
                        "/api/batches/{}/cancel?user_id=alice",
                        submitted.batch_id
                    ))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cancel: CancelResponse = body_json(response).await;
        assert!(!cancel.cancelled);
    }

    #[tokio::test]
    async fn test_stream_of_finished_batch_replays_terminal_event() {
        let (app, state) = app();
        state.ledger.grant("alice", 100);

        let submitted: SubmitBatchResponse =
            body_json(submit(&app, "alice", &["AAPL"]).await).await;
        wait_completed(&state, "alice", &submitted.batch_id).await;

        // Reconnecting after completion: the stream must yield the terminal
        // event from the snapshot and close instead of waiting forever.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!(
                        "/api/batches/{}/stream?user_id=alice",
                        submitted.batch_id
                    ))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = tokio::time::timeout(
            Duration::from_secs(2),
            axum::body::to_bytes(response.into_body(), usize::MAX),
        )
        .await
        .expect("stream did not close")
        .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("batch_completed"));
    }

    #[tokio::test]
    async fn test_stream_enforces_ownership() {
        let (app, state) = app();
        state.ledger.grant("alice", 100);

        let submitted: SubmitBatchResponse =
            body_json(submit(&app, "alice", &["AAPL"]).await).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!(
                        "/api/batches/{}/stream?user_id=bob",
                        submitted.batch_id
                    ))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
