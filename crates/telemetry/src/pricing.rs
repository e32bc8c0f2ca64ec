//! Built-in pricing table for common LLM models.
//!
//! Prices are in USD per 1 million tokens. Each model has an input and
//! output price. Custom pricing can be added at runtime via TOML config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use streamloop_core::{CostEstimate, ProviderError, TokenUsage};

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Price the given usage.
    pub fn estimate(&self, usage: &TokenUsage) -> CostEstimate {
        let input_cost_usd = usage.input_tokens as f64 * self.input_per_m / 1_000_000.0;
        let output_cost_usd = usage.output_tokens as f64 * self.output_per_m / 1_000_000.0;
        CostEstimate {
            input_cost_usd,
            output_cost_usd,
            total_cost_usd: input_cost_usd + output_cost_usd,
        }
    }
}

const VENDOR_PREFIXES: [&str; 3] = ["anthropic", "openai", "google"];

/// Thread-safe pricing table with built-in defaults and custom overrides.
///
/// Keys are `vendor/model`. Lookups try an exact match, then the bare model
/// name under each vendor prefix, then the longest known model name that
/// prefixes the requested one (so dated snapshots price like their family).
#[derive(Debug)]
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        // ── Anthropic ──────────────────────────────────────────────
        prices.insert("anthropic/claude-opus-4".into(), ModelPricing::new(15.0, 75.0));
        prices.insert("anthropic/claude-sonnet-4".into(), ModelPricing::new(3.0, 15.0));
        prices.insert("anthropic/claude-3-7-sonnet".into(), ModelPricing::new(3.0, 15.0));
        prices.insert("anthropic/claude-3-5-sonnet".into(), ModelPricing::new(3.0, 15.0));
        prices.insert("anthropic/claude-3-5-haiku".into(), ModelPricing::new(0.8, 4.0));
        prices.insert("anthropic/claude-3-haiku".into(), ModelPricing::new(0.25, 1.25));

        // ── OpenAI ─────────────────────────────────────────────────
        prices.insert("openai/gpt-4o".into(), ModelPricing::new(2.5, 10.0));
        prices.insert("openai/gpt-4o-mini".into(), ModelPricing::new(0.15, 0.6));
        prices.insert("openai/gpt-4.1".into(), ModelPricing::new(2.0, 8.0));
        prices.insert("openai/gpt-4.1-mini".into(), ModelPricing::new(0.4, 1.6));
        prices.insert("openai/gpt-4.1-nano".into(), ModelPricing::new(0.1, 0.4));
        prices.insert("openai/gpt-4-turbo".into(), ModelPricing::new(10.0, 30.0));
        prices.insert("openai/o1".into(), ModelPricing::new(15.0, 60.0));
        prices.insert("openai/o3-mini".into(), ModelPricing::new(1.1, 4.4));

        // ── Google ─────────────────────────────────────────────────
        prices.insert("google/gemini-2.5-pro".into(), ModelPricing::new(1.25, 10.0));
        prices.insert("google/gemini-2.5-flash".into(), ModelPricing::new(0.3, 2.5));
        prices.insert("google/gemini-2.0-flash".into(), ModelPricing::new(0.1, 0.4));
        prices.insert("google/gemini-1.5-pro".into(), ModelPricing::new(1.25, 5.0));
        prices.insert("google/gemini-1.5-flash".into(), ModelPricing::new(0.075, 0.3));

        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Exact-key lookup.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        prices.get(model).copied()
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        let mut prices = self.prices.write().unwrap_or_else(PoisonError::into_inner);
        prices.insert(model.into(), pricing);
    }

    /// Resolve the pricing for a model name using the lookup order above.
    pub fn resolve(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);

        if let Some(p) = prices.get(model) {
            return Some(*p);
        }

        for vendor in VENDOR_PREFIXES {
            if let Some(p) = prices.get(&format!("{vendor}/{model}")) {
                return Some(*p);
            }
        }

        let model_lower = model.to_lowercase();
        let bare_model = model_lower.rsplit('/').next().unwrap_or(&model_lower);

        let mut best: Option<(usize, ModelPricing)> = None;
        for (key, pricing) in prices.iter() {
            let bare_key = key.rsplit('/').next().unwrap_or(key).to_lowercase();
            if bare_model.starts_with(&bare_key)
                && best.is_none_or(|(len, _)| bare_key.len() > len)
            {
                best = Some((bare_key.len(), *pricing));
            }
        }

        if best.is_some() {
            tracing::trace!(model, "Priced model by prefix match");
        }
        best.map(|(_, p)| p)
    }

    /// Estimate the cost of `usage` on `model`.
    ///
    /// Models that resolve to nothing are an error, never a zero cost.
    pub fn estimate(&self, model: &str, usage: &TokenUsage) -> Result<CostEstimate, ProviderError> {
        self.resolve(model)
            .map(|p| p.estimate(usage))
            .ok_or_else(|| ProviderError::UnknownModel(model.to_string()))
    }

    /// All entries, sorted by model name.
    pub fn entries(&self) -> Vec<(String, ModelPricing)> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<_> = prices.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Number of models in the pricing table.
    pub fn len(&self) -> usize {
        self.prices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-10
    }

    #[test]
    fn default_table_has_models() {
        let table = PricingTable::with_defaults();
        assert!(table.len() >= 15);
        assert!(!table.is_empty());
    }

    #[test]
    fn known_model_cost() {
        let table = PricingTable::with_defaults();

        // Claude Sonnet 4: $3/M input, $15/M output
        let cost = table
            .estimate("anthropic/claude-sonnet-4", &TokenUsage::new(1000, 500))
            .unwrap();
        // (1000 * 3.0 + 500 * 15.0) / 1M = 0.0105
        assert!(close(cost.total_cost_usd, 0.0105));
        assert!(close(cost.input_cost_usd, 0.003));
        assert!(close(cost.output_cost_usd, 0.0075));
    }

    #[test]
    fn bare_name_matches_vendor_prefixed_key() {
        let table = PricingTable::with_defaults();
        let cost = table.estimate("gpt-4o", &TokenUsage::new(1_000_000, 0)).unwrap();
        assert!(close(cost.total_cost_usd, 2.5));
    }

    #[test]
    fn dated_snapshot_uses_longest_prefix() {
        let table = PricingTable::with_defaults();
        let mini = table
            .estimate("gpt-4o-mini-2024-07-18", &TokenUsage::new(1_000_000, 0))
            .unwrap();
        assert!(close(mini.total_cost_usd, 0.15));

        let sonnet = table
            .estimate("claude-sonnet-4-20250514", &TokenUsage::new(0, 1_000_000))
            .unwrap();
        assert!(close(sonnet.total_cost_usd, 15.0));
    }

    #[test]
    fn unknown_model_fails_loudly() {
        let table = PricingTable::with_defaults();
        let err = table
            .estimate("unknown/model-xyz", &TokenUsage::new(1000, 500))
            .unwrap_err();
        assert_eq!(err, ProviderError::UnknownModel("unknown/model-xyz".into()));
    }

    #[test]
    fn estimate_is_deterministic() {
        let table = PricingTable::with_defaults();
        let usage = TokenUsage::new(1234, 567);
        let a = table.estimate("gemini-2.5-flash", &usage).unwrap();
        let b = table.estimate("gemini-2.5-flash", &usage).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn custom_pricing() {
        let table = PricingTable::empty();
        assert!(table.is_empty());

        table.set("custom/model", ModelPricing::new(1.0, 2.0));
        assert_eq!(table.len(), 1);

        let cost = table
            .estimate("custom/model", &TokenUsage::new(1_000_000, 1_000_000))
            .unwrap();
        assert!(close(cost.total_cost_usd, 3.0));
    }

    #[test]
    fn set_overrides_existing() {
        let table = PricingTable::with_defaults();
        table.set("openai/gpt-4o", ModelPricing::new(5.0, 20.0));
        let cost = table
            .estimate("openai/gpt-4o", &TokenUsage::new(1_000_000, 0))
            .unwrap();
        assert!(close(cost.total_cost_usd, 5.0));
    }

    #[test]
    fn entries_are_sorted() {
        let table = PricingTable::with_defaults();
        let entries = table.entries();
        assert!(entries.iter().any(|(k, _)| k == "openai/gpt-4o"));
        assert!(entries.windows(2).all(|w| w[0].0 <= w[1].0));
    }
}
