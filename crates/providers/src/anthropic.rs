//! Anthropic Messages API adapter.
//!
//! Wire format:
//! - System prompt as a top-level field
//! - Native `tool_use` / `tool_result` content blocks
//! - Streaming via typed SSE events: `message_start`, `content_block_start`,
//!   `content_block_delta`, `content_block_stop`, `message_delta`, `message_stop`
//!
//! Input tokens arrive in `message_start`, output tokens in `message_delta`;
//! the two are merged into a single usage event when the turn ends.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

use streamloop_core::{
    AgentConfig, AgentEvent, ContentBlock, CostEstimate, HttpRequest, Message, ProviderAdapter,
    ProviderError, Role, SseEvent, StopReason, TokenUsage, ToolDefinition,
};
use streamloop_telemetry::PricingTable;

use crate::shared::{normalize_base_url, parse_tool_input};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// A content block being assembled from deltas.
#[derive(Debug)]
enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        json: String,
    },
    /// Thinking and other block kinds the loop does not consume.
    Ignored,
}

/// Everything the adapter learns during one turn.
#[derive(Debug, Default)]
struct TurnState {
    blocks: HashMap<u64, PartialBlock>,
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    usage_emitted: bool,
}

impl TurnState {
    /// The merged usage for this call, at most once per turn.
    fn take_usage(&mut self) -> Option<AgentEvent> {
        if self.usage_emitted || (self.input_tokens.is_none() && self.output_tokens.is_none()) {
            return None;
        }
        self.usage_emitted = true;
        Some(AgentEvent::Usage {
            usage: TokenUsage::new(
                self.input_tokens.unwrap_or(0),
                self.output_tokens.unwrap_or(0),
            ),
            cost: None,
        })
    }
}

/// Anthropic native Messages API adapter.
pub struct AnthropicAdapter {
    base_url: String,
    pricing: Arc<PricingTable>,
    state: TurnState,
}

impl AnthropicAdapter {
    pub fn new(pricing: Arc<PricingTable>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            pricing,
            state: TurnState::default(),
        }
    }

    /// Use a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = normalize_base_url(base_url);
        self
    }

    /// Convert the conversation to Anthropic content-block messages.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage<'_>> {
        messages
            .iter()
            .filter_map(|msg| {
                let content: Vec<ApiContentBlock<'_>> = msg
                    .content
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::Text { text } if text.is_empty() => None,
                        ContentBlock::Text { text } => Some(ApiContentBlock::Text { text }),
                        ContentBlock::ToolUse {
                            id, name, input, ..
                        } => Some(ApiContentBlock::ToolUse { id, name, input }),
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } => Some(ApiContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error: *is_error,
                        }),
                    })
                    .collect();

                if content.is_empty() {
                    return None;
                }
                let role = match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                Some(ApiMessage { role, content })
            })
            .collect()
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiTool<'_>> {
        tools
            .iter()
            .map(|t| ApiTool {
                name: &t.name,
                description: &t.description,
                input_schema: &t.parameters,
            })
            .collect()
    }

    fn map_stop_reason(reason: &str) -> StopReason {
        match reason {
            "end_turn" => StopReason::EndTurn,
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            "refusal" => StopReason::ContentFilter,
            other => StopReason::Other(other.to_string()),
        }
    }

    fn on_block_start(&mut self, event: &serde_json::Value, out: &mut Vec<AgentEvent>) {
        let index = event["index"].as_u64().unwrap_or(0);
        let block = &event["content_block"];

        let partial = match block["type"].as_str().unwrap_or("") {
            "text" => PartialBlock::Text(block["text"].as_str().unwrap_or("").to_string()),
            "tool_use" => {
                let id = block["id"].as_str().unwrap_or("").to_string();
                let name = block["name"].as_str().unwrap_or("").to_string();
                out.push(AgentEvent::ToolUseStart {
                    tool_use_id: id.clone(),
                    tool_name: name.clone(),
                });
                PartialBlock::ToolUse {
                    id,
                    name,
                    json: String::new(),
                }
            }
            _ => PartialBlock::Ignored,
        };
        self.state.blocks.insert(index, partial);
    }

    fn on_block_delta(&mut self, event: &serde_json::Value, out: &mut Vec<AgentEvent>) {
        let index = event["index"].as_u64().unwrap_or(0);
        let delta = &event["delta"];

        match (delta["type"].as_str().unwrap_or(""), self.state.blocks.get_mut(&index)) {
            ("text_delta", Some(PartialBlock::Text(buffer))) => {
                if let Some(text) = delta["text"].as_str() {
                    buffer.push_str(text);
                    out.push(AgentEvent::TextDelta {
                        text: text.to_string(),
                    });
                }
            }
            ("input_json_delta", Some(PartialBlock::ToolUse { json, .. })) => {
                if let Some(partial) = delta["partial_json"].as_str() {
                    json.push_str(partial);
                }
            }
            _ => {}
        }
    }

    fn on_block_stop(&mut self, event: &serde_json::Value, out: &mut Vec<AgentEvent>) {
        let index = event["index"].as_u64().unwrap_or(0);
        match self.state.blocks.remove(&index) {
            Some(PartialBlock::Text(text)) if !text.is_empty() => {
                out.push(AgentEvent::TextDone { text });
            }
            Some(PartialBlock::ToolUse { id, name, json }) => {
                let input = parse_tool_input("anthropic", &name, &json);
                out.push(AgentEvent::ToolUseDone {
                    tool_use_id: id,
                    tool_name: name,
                    input,
                    thought_signature: None,
                });
            }
            _ => {}
        }
    }
}

impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn reset_state(&mut self) {
        self.state = TurnState::default();
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        config: &AgentConfig,
    ) -> Result<HttpRequest, ProviderError> {
        let mut body = serde_json::json!({
            "model": config.model,
            "max_tokens": config.max_tokens,
            "messages": Self::to_api_messages(messages),
            "stream": true,
        });

        if let Some(ref system) = config.system_prompt {
            body["system"] = serde_json::json!(system);
        }

        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(Self::to_api_tools(tools))
                .map_err(|e| ProviderError::Serialization(e.to_string()))?;
        }

        Ok(HttpRequest {
            url: format!("{}/v1/messages", self.base_url),
            headers: vec![
                ("content-type".into(), "application/json".into()),
                ("anthropic-version".into(), ANTHROPIC_VERSION.into()),
                ("accept".into(), "text/event-stream".into()),
            ],
            body,
        })
    }

    fn parse_sse_event(&mut self, record: &SseEvent) -> Vec<AgentEvent> {
        let event: serde_json::Value = match serde_json::from_str(&record.data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data = %record.data, "Ignoring unparseable Anthropic SSE");
                return Vec::new();
            }
        };

        let event_type = event["type"]
            .as_str()
            .or(record.event.as_deref())
            .unwrap_or("");

        let mut out = Vec::new();
        match event_type {
            "message_start" => {
                let usage = &event["message"]["usage"];
                if let Some(input) = usage["input_tokens"].as_u64() {
                    self.state.input_tokens = Some(input);
                }
                if let Some(output) = usage["output_tokens"].as_u64() {
                    self.state.output_tokens = Some(output);
                }
                out.push(AgentEvent::MessageStart);
            }
            "content_block_start" => self.on_block_start(&event, &mut out),
            "content_block_delta" => self.on_block_delta(&event, &mut out),
            "content_block_stop" => self.on_block_stop(&event, &mut out),
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    out.push(AgentEvent::TurnEnd {
                        stop_reason: Self::map_stop_reason(reason),
                    });
                }
                // message_delta usage is cumulative for the call
                let usage = &event["usage"];
                if let Some(output) = usage["output_tokens"].as_u64() {
                    self.state.output_tokens = Some(output);
                }
                if let Some(input) = usage["input_tokens"].as_u64() {
                    self.state.input_tokens = Some(input);
                }
                out.extend(self.state.take_usage());
            }
            "message_stop" => out.extend(self.state.take_usage()),
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| event["error"].to_string());
                out.push(AgentEvent::Error { error: message });
            }
            // ping and future event types
            _ => {}
        }
        out
    }

    fn estimate_cost(&self, model: &str, usage: &TokenUsage) -> Result<CostEstimate, ProviderError> {
        self.pricing.estimate(model, usage)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: Vec<ApiContentBlock<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock<'a> {
    Text {
        text: &'a str,
    },
    ToolUse {
        id: &'a str,
        name: &'a str,
        input: &'a serde_json::Value,
    },
    ToolResult {
        tool_use_id: &'a str,
        content: &'a str,
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}
