// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tickerflow_core::{AdmissionError, ResolveError, SubmitError};

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Insufficient credits: need {needed}, have {available}")]
    InsufficientCredits { needed: u64, available: u64 },

    #[error("Batch does not belong to this user")]
    Forbidden,

    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Admission(AdmissionError::InsufficientCredits { needed, available }) => {
                ApiError::InsufficientCredits { needed, available }
            }
            SubmitError::EmptyBatch
            | SubmitError::InvalidUserId { .. }
            | SubmitError::InvalidSymbol { .. }
            | SubmitError::InvalidAnalysisDate { .. } => ApiError::BadRequest(err.to_string()),
            SubmitError::Store(store_err) => ApiError::Internal(store_err.to_string()),
        }
    }
}

impl ApiError {
    /// Build from a resolver outcome for the given batch id.
    pub fn from_resolve(err: ResolveError, batch_id: &str) -> Self {
        match err {
            ResolveError::Forbidden => ApiError::Forbidden,
            ResolveError::NotFound => ApiError::BatchNotFound(batch_id.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
            ApiError::InsufficientCredits { needed, available } => {
                tracing::warn!(needed, available, "Admission rejected");
                (
                    StatusCode::PAYMENT_REQUIRED,
                    ErrorResponse::with_details(
                        "Insufficient credits",
                        format!("need {needed}, have {available}"),
                    ),
                )
            }
            ApiError::Forbidden => {
                tracing::warn!("Forbidden batch access");
                (
                    StatusCode::FORBIDDEN,
                    ErrorResponse::new("Batch does not belong to this user"),
                )
            }
            ApiError::BatchNotFound(id) => {
                tracing::debug!(batch_id = %id, "Batch not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Batch not found", format!("Batch ID: {id}")),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
