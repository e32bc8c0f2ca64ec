//! Per-invocation loop configuration.

use serde::{Deserialize, Serialize};

use crate::provider::ToolDefinition;

/// Hard ceiling on provider calls per invocation.
pub const DEFAULT_MAX_ITERATIONS: u32 = 200;

/// Default `max_tokens` requested per turn.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Configuration for one loop invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model identifier sent to the vendor and used for pricing
    pub model: String,

    /// Tools advertised to the model
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Halt once cumulative input + output tokens exceed this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<u64>,

    /// Halt once cumulative cost exceeds this many USD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_budget_usd: Option<f64>,

    /// Maximum provider calls (safety limit)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}
fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl AgentConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            tools: Vec::new(),
            system_prompt: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            token_budget: None,
            cost_budget_usd: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_token_budget(mut self, budget: u64) -> Self {
        self.token_budget = Some(budget);
        self
    }

    pub fn with_cost_budget(mut self, usd: f64) -> Self {
        self.cost_budget_usd = Some(usd);
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }
}
