//! OpenAI-compatible Chat Completions adapter.
//!
//! Works with OpenAI and any server exposing the same streaming API
//! (OpenRouter, Groq, vLLM, Ollama's `/v1`).
//!
//! Tool calls stream as `delta.tool_calls[]` fragments keyed by array index;
//! the name and id arrive once and the JSON arguments arrive in pieces. Usage
//! comes in a trailing chunk with empty `choices` when
//! `stream_options.include_usage` is set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

use streamloop_core::{
    AgentConfig, AgentEvent, ContentBlock, CostEstimate, HttpRequest, Message, ProviderAdapter,
    ProviderError, Role, SseEvent, StopReason, TokenUsage, ToolDefinition,
};
use streamloop_telemetry::PricingTable;

use crate::shared::{normalize_base_url, parse_tool_input};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
    started: bool,
}

#[derive(Debug, Default)]
struct TurnState {
    started: bool,
    text: String,
    /// Keyed by the vendor's `index` so calls finish in index order.
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    finished: bool,
    usage_emitted: bool,
}

/// OpenAI-compatible streaming adapter.
pub struct OpenAiAdapter {
    name: String,
    base_url: String,
    pricing: Arc<PricingTable>,
    state: TurnState,
}

impl OpenAiAdapter {
    pub fn new(pricing: Arc<PricingTable>) -> Self {
        Self {
            name: "openai".into(),
            base_url: DEFAULT_BASE_URL.into(),
            pricing,
            state: TurnState::default(),
        }
    }

    /// Point at another OpenAI-compatible server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = normalize_base_url(base_url);
        self
    }

    /// Convert the conversation to chat-completion messages.
    ///
    /// Tool results become one `tool` message each, in block order.
    fn to_api_messages(messages: &[Message], system: Option<&str>) -> Vec<ApiMessage> {
        let mut result = Vec::new();

        if let Some(system) = system {
            result.push(ApiMessage::text("system", system));
        }

        for msg in messages {
            match msg.role {
                Role::User => {
                    for block in &msg.content {
                        if let ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } = block
                        {
                            result.push(ApiMessage {
                                role: "tool".into(),
                                content: Some(content.clone()),
                                tool_calls: None,
                                tool_call_id: Some(tool_use_id.clone()),
                            });
                        }
                    }
                    let text = msg.text();
                    if !text.is_empty() {
                        result.push(ApiMessage::text("user", &text));
                    }
                }
                Role::Assistant => {
                    let tool_calls: Vec<ApiToolCall> = msg
                        .content
                        .iter()
                        .filter_map(|block| match block {
                            ContentBlock::ToolUse {
                                id, name, input, ..
                            } => Some(ApiToolCall {
                                id: id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: name.clone(),
                                    arguments: input.to_string(),
                                },
                            }),
                            _ => None,
                        })
                        .collect();
                    let text = msg.text();

                    result.push(ApiMessage {
                        role: "assistant".into(),
                        content: (!text.is_empty()).then_some(text),
                        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                        tool_call_id: None,
                    });
                }
            }
        }

        result
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn map_finish_reason(reason: &str, has_tool_calls: bool) -> StopReason {
        match reason {
            "tool_calls" | "function_call" => StopReason::ToolUse,
            // Some compatible servers report "stop" even when calling tools
            "stop" if has_tool_calls => StopReason::ToolUse,
            "stop" => StopReason::EndTurn,
            "length" => StopReason::MaxTokens,
            "content_filter" => StopReason::ContentFilter,
            other => StopReason::Other(other.to_string()),
        }
    }

    /// Emit the completed text and tool calls, then the turn end.
    fn finish_turn(&mut self, reason: Option<&str>, out: &mut Vec<AgentEvent>) {
        if self.state.finished {
            return;
        }
        self.state.finished = true;

        let text = std::mem::take(&mut self.state.text);
        if !text.is_empty() {
            out.push(AgentEvent::TextDone { text });
        }

        let tool_calls = std::mem::take(&mut self.state.tool_calls);
        let has_tool_calls = !tool_calls.is_empty();
        for acc in tool_calls.into_values() {
            let input = parse_tool_input(&self.name, &acc.name, &acc.arguments);
            out.push(AgentEvent::ToolUseDone {
                tool_use_id: acc.id,
                tool_name: acc.name,
                input,
                thought_signature: None,
            });
        }

        let stop_reason = match reason {
            Some(reason) => Self::map_finish_reason(reason, has_tool_calls),
            None if has_tool_calls => StopReason::ToolUse,
            None => StopReason::EndTurn,
        };
        out.push(AgentEvent::TurnEnd { stop_reason });
    }

    fn on_chunk(&mut self, chunk: StreamResponse, out: &mut Vec<AgentEvent>) {
        if !self.state.started && !chunk.choices.is_empty() {
            self.state.started = true;
            out.push(AgentEvent::MessageStart);
        }

        for choice in chunk.choices.into_iter().filter(|c| c.index == 0) {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                self.state.text.push_str(&content);
                out.push(AgentEvent::TextDelta { text: content });
            }

            for tc_delta in choice.delta.tool_calls.unwrap_or_default() {
                let acc = self.state.tool_calls.entry(tc_delta.index).or_default();
                // The id announced in ToolUseStart is final
                if let Some(id) = tc_delta.id.filter(|id| !id.is_empty()) {
                    if !acc.started {
                        acc.id = id;
                    }
                }
                if let Some(func) = tc_delta.function {
                    if let Some(name) = func.name {
                        acc.name = name;
                    }
                    if let Some(args) = func.arguments {
                        acc.arguments.push_str(&args);
                    }
                }
                if !acc.started && !acc.name.is_empty() {
                    // Some compatible servers omit ids entirely
                    if acc.id.is_empty() {
                        acc.id = format!("call_{}", uuid::Uuid::new_v4().simple());
                    }
                    acc.started = true;
                    out.push(AgentEvent::ToolUseStart {
                        tool_use_id: acc.id.clone(),
                        tool_name: acc.name.clone(),
                    });
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.finish_turn(Some(&reason), out);
            }
        }

        if let Some(usage) = chunk.usage {
            if !self.state.usage_emitted {
                self.state.usage_emitted = true;
                out.push(AgentEvent::Usage {
                    usage: TokenUsage::new(usage.prompt_tokens, usage.completion_tokens),
                    cost: None,
                });
            }
        }
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.name
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
        let api_messages = Self::to_api_messages(messages, config.system_prompt.as_deref());

        let mut body = serde_json::json!({
            "model": config.model,
            "messages": api_messages,
            "max_tokens": config.max_tokens,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(Self::to_api_tools(tools))
                .map_err(|e| ProviderError::Serialization(e.to_string()))?;
        }

        Ok(HttpRequest {
            url: format!("{}/chat/completions", self.base_url),
            headers: vec![
                ("content-type".into(), "application/json".into()),
                ("accept".into(), "text/event-stream".into()),
            ],
            body,
        })
    }

    fn parse_sse_event(&mut self, record: &SseEvent) -> Vec<AgentEvent> {
        let data = record.data.trim();
        let mut out = Vec::new();

        // "[DONE]" signals end of stream
        if data == "[DONE]" {
            if self.state.started {
                self.finish_turn(None, &mut out);
            }
            return out;
        }

        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable OpenAI SSE");
                return out;
            }
        };

        if let Some(error) = value.get("error") {
            let message = error["message"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            out.push(AgentEvent::Error { error: message });
            return out;
        }

        match serde_json::from_value::<StreamResponse>(value) {
            Ok(chunk) => self.on_chunk(chunk, &mut out),
            Err(e) => trace!(error = %e, "Ignoring unexpected OpenAI chunk shape"),
        }
        out
    }

    fn estimate_cost(&self, model: &str, usage: &TokenUsage) -> Result<CostEstimate, ProviderError> {
        self.pricing.estimate(model, usage)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}
