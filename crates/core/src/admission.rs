// crates/core/src/admission.rs
//! Admission control: quote a batch's credit cost and debit it atomically
//! before any orchestration state is created.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::AdmissionError;
use crate::pricing::{PricingTable, SharedPricing};

/// Per-user credit balances.
///
/// `try_debit` is the only cross-batch shared-resource operation in the
/// system; read-compare-debit happens in one critical section so two
/// concurrent submissions can never both drain a starved balance.
#[derive(Default)]
pub struct CreditLedger {
    balances: Mutex<HashMap<String, u64>>,
}

impl CreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        match self.balances.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("credit ledger mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Current balance; users start at zero.
    pub fn balance(&self, user_id: &str) -> u64 {
        self.lock().get(user_id).copied().unwrap_or(0)
    }

    /// Add credits. Returns the new balance.
    pub fn grant(&self, user_id: &str, amount: u64) -> u64 {
        let mut balances = self.lock();
        let balance = balances.entry(user_id.to_string()).or_insert(0);
        *balance = balance.saturating_add(amount);
        *balance
    }

    /// Debit `cost` if and only if the balance covers it, in one critical
    /// section. Returns the remaining balance on success; on rejection the
    /// balance is untouched.
    pub fn try_debit(&self, user_id: &str, cost: u64) -> Result<u64, AdmissionError> {
        let mut balances = self.lock();
        let balance = balances.entry(user_id.to_string()).or_insert(0);
        if *balance < cost {
            return Err(AdmissionError::InsufficientCredits {
                needed: cost,
                available: *balance,
            });
        }
        *balance -= cost;
        Ok(*balance)
    }
}

/// Quotes batch costs from the pricing table and gates admission on the
/// credit ledger. Debits exactly once per admitted batch, synchronously,
/// before orchestration starts.
pub struct AdmissionController {
    ledger: Arc<CreditLedger>,
    pricing: Arc<SharedPricing>,
}

impl AdmissionController {
    pub fn new(ledger: Arc<CreditLedger>, pricing: Arc<SharedPricing>) -> Self {
        Self { ledger, pricing }
    }

    /// Cost of a prospective batch: per-job cost x job count.
    pub fn quote(&self, depth: u8, provider: &str, model: &str, job_count: usize) -> u64 {
        self.pricing
            .load()
            .per_job_cost(depth, provider, model)
            .saturating_mul(job_count as u64)
    }

    /// Atomically debit `cost` from the user. Returns the remaining balance.
    pub fn try_admit(&self, user_id: &str, cost: u64) -> Result<u64, AdmissionError> {
        let remaining = self.ledger.try_debit(user_id, cost)?;
        tracing::info!(
            user_id = %user_id,
            cost,
            remaining,
            "batch admitted"
        );
        Ok(remaining)
    }

    /// The pricing table in effect right now.
    pub fn pricing(&self) -> Arc<PricingTable> {
        self.pricing.load()
    }

    /// Atomically replace the pricing table.
    pub fn reload_pricing(&self, table: PricingTable) {
        self.pricing.reload(table);
        tracing::info!("pricing table reloaded");
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn controller() -> AdmissionController {
        AdmissionController::new(
            Arc::new(CreditLedger::new()),
            Arc::new(SharedPricing::default()),
        )
    }

    #[test]
    fn test_ledger_grant_and_balance() {
        let ledger = CreditLedger::new();
        assert_eq!(ledger.balance("alice"), 0);
        assert_eq!(ledger.grant("alice", 10), 10);
        assert_eq!(ledger.grant("alice", 5), 15);
        assert_eq!(ledger.balance("bob"), 0);
    }

    #[test]
    fn test_try_debit_rejects_without_touching_balance() {
        let ledger = CreditLedger::new();
        ledger.grant("alice", 5);

        let err = ledger.try_debit("alice", 6).unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::InsufficientCredits {
                needed: 6,
                available: 5
            }
        ));
        assert_eq!(ledger.balance("alice"), 5);

        assert_eq!(ledger.try_debit("alice", 5).unwrap(), 0);
        assert_eq!(ledger.balance("alice"), 0);
    }

    #[test]
    fn test_quote_multiplies_job_count() {
        let ctrl = controller();
        // depth 2 = 2, gpt-4o-mini = 1 -> 3 per job
        assert_eq!(ctrl.quote(2, "openai", "gpt-4o-mini", 4), 12);
        assert_eq!(ctrl.quote(2, "openai", "gpt-4o-mini", 0), 0);
    }

    #[test]
    fn test_quote_respects_toggles_after_reload() {
        let ctrl = controller();
        let mut table = (*ctrl.pricing()).clone();
        table.charge_depth = false;
        table.charge_model = false;
        ctrl.reload_pricing(table);
        assert_eq!(ctrl.quote(5, "openai", "gpt-4o", 10), 0);
    }

    // No double-spend: N concurrent submissions against a balance that
    // covers exactly one admit exactly once, for any interleaving.
    #[test]
    fn test_no_double_debit_under_concurrency() {
        let ledger = Arc::new(CreditLedger::new());
        ledger.grant("alice", 6);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.try_debit("alice", 6).is_ok())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|admitted| *admitted)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(ledger.balance("alice"), 0);
    }
}
