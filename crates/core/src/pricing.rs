// crates/core/src/pricing.rs
//! Credit pricing for analysis jobs.
//!
//! A per-job cost has two independently toggleable components: a base cost
//! keyed by research depth (1-5) and a surcharge keyed by (provider, model).
//! Model lookup is exact first, then prefix fallback within the same
//! provider, then a default for unconfigured keys.
//!
//! The table is immutable once built; runtime edits clone, mutate, and swap
//! the whole table atomically via [`SharedPricing::reload`].

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Cost charged when neither exact nor prefix lookup matches a model.
pub const DEFAULT_MODEL_COST: u64 = 1;

/// Base cost charged for an unconfigured depth level.
pub const DEFAULT_DEPTH_COST: u64 = 1;

/// One (provider, model) surcharge entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCost {
    pub provider: String,
    pub model: String,
    pub cost: u64,
}

/// The whole pricing configuration. Serializable so it can be loaded from a
/// JSON file and returned verbatim by the admin API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingTable {
    /// Base cost per research depth level.
    pub depth_costs: BTreeMap<u8, u64>,
    /// Per-model surcharges.
    pub model_costs: Vec<ModelCost>,
    /// Fallback for models with no entry.
    pub default_model_cost: u64,
    /// When false, depth contributes zero to every quote.
    pub charge_depth: bool,
    /// When false, the model surcharge contributes zero to every quote.
    pub charge_model: bool,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            depth_costs: BTreeMap::from([(1, 1), (2, 2), (3, 3), (4, 5), (5, 8)]),
            model_costs: vec![
                ModelCost::entry("openai", "gpt-4o", 5),
                ModelCost::entry("openai", "gpt-4o-mini", 1),
                ModelCost::entry("openai", "gpt-4-turbo", 4),
                ModelCost::entry("google", "gemini-2.5-pro", 4),
                ModelCost::entry("google", "gemini-2.5-flash", 2),
                ModelCost::entry("google", "gemini-2.5-flash-lite", 1),
                ModelCost::entry("deepseek", "deepseek-chat", 1),
                ModelCost::entry("dashscope", "qwen-turbo", 1),
                ModelCost::entry("dashscope", "qwen-plus-latest", 2),
                ModelCost::entry("dashscope", "qwen-max", 3),
                ModelCost::entry("openrouter", "default", 2),
            ],
            default_model_cost: DEFAULT_MODEL_COST,
            charge_depth: true,
            charge_model: true,
        }
    }
}

impl ModelCost {
    fn entry(provider: &str, model: &str, cost: u64) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            cost,
        }
    }
}

impl PricingTable {
    /// Base cost for a depth level; unconfigured levels fall back to
    /// [`DEFAULT_DEPTH_COST`].
    pub fn depth_cost(&self, depth: u8) -> u64 {
        self.depth_costs
            .get(&depth)
            .copied()
            .unwrap_or(DEFAULT_DEPTH_COST)
    }

    /// Surcharge for a model: exact match, then prefix fallback within the
    /// provider (either direction, to tolerate dated model suffixes), then
    /// the default.
    pub fn model_cost(&self, provider: &str, model: &str) -> u64 {
        let provider = provider.trim().to_lowercase();
        let model = model.trim();

        if let Some(entry) = self
            .model_costs
            .iter()
            .find(|e| e.provider == provider && e.model == model)
        {
            return entry.cost;
        }

        if let Some(entry) = self.model_costs.iter().find(|e| {
            e.provider == provider
                && (model.starts_with(&e.model) || e.model.starts_with(model))
        }) {
            return entry.cost;
        }

        self.default_model_cost
    }

    /// Cost of one job for the given parameters. Disabled components
    /// contribute zero; with both toggles off analysis is free.
    pub fn per_job_cost(&self, depth: u8, provider: &str, model: &str) -> u64 {
        let mut cost = 0;
        if self.charge_depth {
            cost += self.depth_cost(depth);
        }
        if self.charge_model {
            cost += self.model_cost(provider, model);
        }
        cost
    }

    /// Insert or replace a model surcharge entry.
    pub fn set_model_cost(&mut self, provider: &str, model: &str, cost: u64) {
        let provider = provider.trim().to_lowercase();
        let model = model.trim().to_string();
        match self
            .model_costs
            .iter_mut()
            .find(|e| e.provider == provider && e.model == model)
        {
            Some(entry) => entry.cost = cost,
            None => self.model_costs.push(ModelCost {
                provider,
                model,
                cost,
            }),
        }
    }

    /// Remove a model surcharge entry, restoring the default for that key.
    /// Returns true when an entry was removed.
    pub fn remove_model_cost(&mut self, provider: &str, model: &str) -> bool {
        let provider = provider.trim().to_lowercase();
        let model = model.trim();
        let before = self.model_costs.len();
        self.model_costs
            .retain(|e| !(e.provider == provider && e.model == model));
        self.model_costs.len() < before
    }
}

/// Shared handle to the current pricing table.
///
/// Reads clone an `Arc` under a short read lock; `reload` swaps the whole
/// table in one write, so a quote never observes a half-edited table.
pub struct SharedPricing {
    current: RwLock<Arc<PricingTable>>,
}

impl SharedPricing {
    pub fn new(table: PricingTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
        }
    }

    /// The table in effect right now.
    pub fn load(&self) -> Arc<PricingTable> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => {
                tracing::error!("pricing lock poisoned, recovering");
                Arc::clone(&poisoned.into_inner())
            }
        }
    }

    /// Replace the whole table atomically.
    pub fn reload(&self, table: PricingTable) {
        match self.current.write() {
            Ok(mut guard) => *guard = Arc::new(table),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(table),
        }
    }
}

impl Default for SharedPricing {
    fn default() -> Self {
        Self::new(PricingTable::default())
    }
}
