//! Budget enforcement for a single loop invocation.
//!
//! The tracker owns the running usage and cost totals. Limits are checked in
//! a fixed order (tokens, then cost) immediately after each usage update; the
//! iteration ceiling is checked before each request is issued.

use streamloop_core::{AgentConfig, BudgetReason, CostEstimate, TokenUsage};

/// A crossed limit.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetBreach {
    pub reason: BudgetReason,
    pub message: String,
}

/// Cumulative usage, cost and iteration count against configured limits.
#[derive(Debug, Clone)]
pub struct BudgetTracker {
    token_budget: Option<u64>,
    cost_budget_usd: Option<f64>,
    max_iterations: u32,
    usage: TokenUsage,
    cost: Option<CostEstimate>,
    iterations: u32,
}

impl BudgetTracker {
    pub fn new(token_budget: Option<u64>, cost_budget_usd: Option<f64>, max_iterations: u32) -> Self {
        Self {
            token_budget,
            cost_budget_usd,
            max_iterations,
            usage: TokenUsage::default(),
            cost: None,
            iterations: 0,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.token_budget, config.cost_budget_usd, config.max_iterations)
    }

    /// Whether cost must be known for enforcement.
    pub fn has_cost_budget(&self) -> bool {
        self.cost_budget_usd.is_some()
    }

    /// Count one request, or report the iteration ceiling if it is already reached.
    pub fn begin_iteration(&mut self) -> Result<u32, BudgetBreach> {
        if self.iterations >= self.max_iterations {
            return Err(BudgetBreach {
                reason: BudgetReason::IterationLimit,
                message: format!(
                    "Iteration limit reached: {} requests (max {})",
                    self.iterations, self.max_iterations
                ),
            });
        }
        self.iterations += 1;
        Ok(self.iterations)
    }

    /// Add one API call's usage and return the new cumulative total.
    pub fn record_usage(&mut self, usage: TokenUsage) -> TokenUsage {
        self.usage += usage;
        self.usage
    }

    /// Record the cost of the cumulative usage.
    pub fn record_cost(&mut self, cost: CostEstimate) {
        self.cost = Some(cost);
    }

    /// Check token then cost limits against the current totals.
    pub fn check(&self) -> Option<BudgetBreach> {
        if let Some(limit) = self.token_budget {
            let used = self.usage.total();
            if used > limit {
                return Some(BudgetBreach {
                    reason: BudgetReason::TokenLimit,
                    message: format!("Token budget exceeded: {used} tokens used (budget {limit})"),
                });
            }
        }

        if let (Some(limit), Some(cost)) = (self.cost_budget_usd, self.cost) {
            if cost.total_cost_usd > limit {
                return Some(BudgetBreach {
                    reason: BudgetReason::CostLimit,
                    message: format!(
                        "Cost budget exceeded: ${:.6} spent (budget ${limit:.6})",
                        cost.total_cost_usd
                    ),
                });
            }
        }

        None
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn cost(&self) -> Option<CostEstimate> {
        self.cost
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}
