// crates/types/src/lib.rs
//! Shared wire and data types for the tickerflow batch analysis system.
//!
//! Pure data, no business logic. Everything here crosses either the HTTP
//! boundary (serde, camelCase) or the core/server crate boundary.

pub mod batch;
pub mod events;

pub use batch::{BatchId, BatchPhase, BatchSummary, JobResult, JobSpec, ProgressSnapshot};
pub use events::ProgressEvent;
