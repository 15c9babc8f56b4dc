// crates/core/src/lib.rs
//! Batch orchestration core for tickerflow.
//!
//! Components, leaves first:
//! - `ProgressStore` - mutex-guarded table of per-batch progress records,
//!   written by the orchestration task, read as deep copies by pollers
//! - `PricingTable` / `CreditLedger` / `AdmissionController` - resource cost
//!   quoting and atomic credit debit before any work starts
//! - `SymbolAnalyzer` + `run_job` - the external analysis boundary; faults
//!   and panics are absorbed into failed `JobResult`s
//! - `BatchOrchestrator` - the sequential per-batch scheduler
//! - `IdentityResolver` - owner-checked snapshot lookup for reconnecting
//!   clients

pub mod admission;
pub mod error;
pub mod orchestrator;
pub mod pricing;
pub mod resolver;
pub mod runner;
pub mod store;

pub use admission::{AdmissionController, CreditLedger};
pub use error::{AdmissionError, ResolveError, StoreError, SubmitError};
pub use orchestrator::{Admitted, BatchOrchestrator, SubmitRequest};
pub use pricing::{ModelCost, PricingTable, SharedPricing};
pub use resolver::IdentityResolver;
pub use runner::{run_job, ProgressFn, SimulatedAnalyzer, SymbolAnalyzer};
pub use store::{ProgressStore, ProgressUpdate};
