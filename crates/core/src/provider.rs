//! Provider adapter trait: the abstraction over LLM vendor wire formats.
//!
//! An adapter knows how to turn a conversation into a vendor HTTP request and
//! how to turn that vendor's server-sent events back into canonical
//! [`AgentEvent`]s. It never performs I/O and never sees credentials; the
//! [`Transport`](crate::transport::Transport) does both.
//!
//! Implementations: Anthropic Messages, OpenAI Chat Completions, Gemini.

use serde::{Deserialize, Serialize};

use crate::agent::AgentConfig;
use crate::error::ProviderError;
use crate::event::AgentEvent;
use crate::message::Message;

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Token usage information.
///
/// Within one loop invocation this is accumulated across turns and never
/// decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Input plus output tokens.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// Estimated spend for a given usage, in USD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub total_cost_usd: f64,
}

/// One server-sent event record: an optional `event:` name and its `data:` payload.
///
/// Multiple `data:` lines are joined with `\n`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SseEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    pub fn new(event: Option<&str>, data: impl Into<String>) -> Self {
        Self {
            event: event.map(str::to_string),
            data: data.into(),
        }
    }
}

/// A fully-described HTTP request, ready for the transport to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

impl HttpRequest {
    /// Look up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The core adapter trait.
///
/// Each vendor implements this once. The agent loop owns one adapter per
/// invocation and calls `reset_state()` at the start of every turn, so any
/// partially assembled text or tool arguments never leak across turns.
pub trait ProviderAdapter: Send {
    /// A human-readable name for this adapter (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Clear per-turn parsing state. Idempotent.
    fn reset_state(&mut self);

    /// Build the vendor request for the full conversation history.
    ///
    /// Pure: the same inputs always produce the same request, and no
    /// credentials are ever included.
    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        config: &AgentConfig,
    ) -> std::result::Result<HttpRequest, ProviderError>;

    /// Convert one SSE record into zero or more canonical events.
    ///
    /// Usage is reported as exactly one merged `AgentEvent::Usage` per API call.
    fn parse_sse_event(&mut self, event: &SseEvent) -> Vec<AgentEvent>;

    /// Price a usage total for a model. Unknown models are an error, never zero.
    fn estimate_cost(
        &self,
        model: &str,
        usage: &TokenUsage,
    ) -> std::result::Result<CostEstimate, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulates() {
        let mut total = TokenUsage::default();
        total += TokenUsage::new(100, 10);
        total += TokenUsage::new(50, 5);
        assert_eq!(total, TokenUsage::new(150, 15));
        assert_eq!(total.total(), 165);
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = HttpRequest {
            url: "https://example.test".into(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: serde_json::json!({}),
        };
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert!(req.header("x-api-key").is_none());
    }

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "runjs".into(),
            description: "Evaluate JavaScript".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string" }
                },
                "required": ["code"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("runjs"));
        assert!(json.contains("code"));
    }
}
