// crates/core/src/error.rs
use thiserror::Error;

/// Errors from the progress store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("batch already exists: {batch_id}")]
    BatchExists { batch_id: String },
}

/// Errors from admission control.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("insufficient credits: need {needed}, have {available}")]
    InsufficientCredits { needed: u64, available: u64 },
}

/// Negative resolution outcomes. Not faults - callers branch on them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// The batch id does not belong to the requesting user.
    #[error("batch does not belong to this user")]
    Forbidden,

    /// No in-memory record. Callers treat this as "assume not running".
    #[error("batch not found")]
    NotFound,
}

/// Errors surfaced synchronously to the submitter, before any state exists.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("batch contains no jobs")]
    EmptyBatch,

    #[error("invalid user id {user_id:?}: {reason}")]
    InvalidUserId { user_id: String, reason: String },

    #[error("invalid symbol at position {position}: {symbol:?}")]
    InvalidSymbol { position: usize, symbol: String },

    #[error("invalid analysis date {value:?}, expected YYYY-MM-DD")]
    InvalidAnalysisDate { value: String },

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
