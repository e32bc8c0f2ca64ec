//! Google Gemini `streamGenerateContent` adapter.
//!
//! Gemini differs from the other vendors in three ways the adapter absorbs:
//! function calls arrive whole (never as argument fragments) and carry no id,
//! function responses are keyed by tool name rather than call id, and a call
//! may carry a `thoughtSignature` that must be echoed back verbatim on the
//! next request. Every chunk repeats `usageMetadata` with running totals, so
//! only the latest value is kept and emitted once the candidate finishes.

use std::sync::Arc;
use tracing::trace;

use streamloop_core::{
    AgentConfig, AgentEvent, ContentBlock, CostEstimate, HttpRequest, Message, ProviderAdapter,
    ProviderError, Role, SseEvent, StopReason, TokenUsage, ToolDefinition, tool_name_for_id,
};
use streamloop_telemetry::PricingTable;

use crate::shared::normalize_base_url;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Schema keywords the Gemini function-declaration dialect rejects.
const UNSUPPORTED_SCHEMA_KEYS: [&str; 3] = ["$schema", "additionalProperties", "$id"];

#[derive(Debug, Default)]
struct TurnState {
    started: bool,
    text: String,
    saw_function_call: bool,
    finished: bool,
    usage: Option<TokenUsage>,
    usage_emitted: bool,
}

/// Gemini streaming adapter.
pub struct GeminiAdapter {
    base_url: String,
    pricing: Arc<PricingTable>,
    state: TurnState,
}

impl GeminiAdapter {
    pub fn new(pricing: Arc<PricingTable>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            pricing,
            state: TurnState::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = normalize_base_url(base_url);
        self
    }

    fn to_contents(messages: &[Message]) -> Result<Vec<serde_json::Value>, ProviderError> {
        let mut contents = Vec::with_capacity(messages.len());

        for msg in messages {
            let mut parts = Vec::with_capacity(msg.content.len());
            for block in &msg.content {
                match block {
                    ContentBlock::Text { text } if text.is_empty() => {}
                    ContentBlock::Text { text } => parts.push(serde_json::json!({ "text": text })),
                    ContentBlock::ToolUse {
                        name,
                        input,
                        thought_signature,
                        ..
                    } => {
                        let mut part = serde_json::json!({
                            "functionCall": { "name": name, "args": input }
                        });
                        if let Some(signature) = thought_signature {
                            part["thoughtSignature"] = serde_json::json!(signature);
                        }
                        parts.push(part);
                    }
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => {
                        let name = tool_name_for_id(messages, tool_use_id).ok_or_else(|| {
                            ProviderError::InvalidRequest(format!(
                                "tool_result {tool_use_id} has no matching tool_use"
                            ))
                        })?;
                        let response = if *is_error {
                            serde_json::json!({ "error": content })
                        } else {
                            serde_json::json!({ "result": content })
                        };
                        parts.push(serde_json::json!({
                            "functionResponse": { "name": name, "response": response }
                        }));
                    }
                }
            }

            if parts.is_empty() {
                continue;
            }
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            contents.push(serde_json::json!({ "role": role, "parts": parts }));
        }

        Ok(contents)
    }

    fn to_function_declarations(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": sanitize_schema(&t.parameters),
                })
            })
            .collect()
    }

    fn map_finish_reason(reason: &str, saw_function_call: bool) -> StopReason {
        match reason {
            "STOP" if saw_function_call => StopReason::ToolUse,
            "STOP" => StopReason::EndTurn,
            "MAX_TOKENS" => StopReason::MaxTokens,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
                StopReason::ContentFilter
            }
            other => StopReason::Other(other.to_string()),
        }
    }

    fn finish_turn(&mut self, stop_reason: StopReason, out: &mut Vec<AgentEvent>) {
        if self.state.finished {
            return;
        }
        self.state.finished = true;

        self.flush_text(out);
        out.push(AgentEvent::TurnEnd { stop_reason });
    }

    /// Close the text run in progress so blocks keep the order the model produced.
    fn flush_text(&mut self, out: &mut Vec<AgentEvent>) {
        let text = std::mem::take(&mut self.state.text);
        if !text.is_empty() {
            out.push(AgentEvent::TextDone { text });
        }
    }

    fn on_part(&mut self, part: &serde_json::Value, out: &mut Vec<AgentEvent>) {
        if part["thought"].as_bool() == Some(true) {
            return;
        }

        if let Some(text) = part["text"].as_str() {
            if !text.is_empty() {
                self.state.text.push_str(text);
                out.push(AgentEvent::TextDelta {
                    text: text.to_string(),
                });
            }
        }

        if let Some(call) = part.get("functionCall") {
            let name = call["name"].as_str().unwrap_or("").to_string();
            let input = match &call["args"] {
                serde_json::Value::Object(_) => call["args"].clone(),
                _ => serde_json::json!({}),
            };
            let tool_use_id = format!("call_{}", uuid::Uuid::new_v4().simple());
            self.state.saw_function_call = true;
            self.flush_text(out);

            out.push(AgentEvent::ToolUseStart {
                tool_use_id: tool_use_id.clone(),
                tool_name: name.clone(),
            });
            out.push(AgentEvent::ToolUseDone {
                tool_use_id,
                tool_name: name,
                input,
                thought_signature: part["thoughtSignature"].as_str().map(str::to_string),
            });
        }
    }
}

/// Strip JSON Schema keywords Gemini rejects, recursively.
fn sanitize_schema(schema: &serde_json::Value) -> serde_json::Value {
    match schema {
        serde_json::Value::Object(map) => map
            .iter()
            .filter(|(k, _)| !UNSUPPORTED_SCHEMA_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), sanitize_schema(v)))
            .collect::<serde_json::Map<_, _>>()
            .into(),
        serde_json::Value::Array(items) => items.iter().map(sanitize_schema).collect(),
        other => other.clone(),
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini"
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
            "contents": Self::to_contents(messages)?,
            "generationConfig": { "maxOutputTokens": config.max_tokens },
        });

        if let Some(ref system) = config.system_prompt {
            body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": system }] });
        }

        if !tools.is_empty() {
            body["tools"] = serde_json::json!([{
                "functionDeclarations": Self::to_function_declarations(tools)
            }]);
        }

        Ok(HttpRequest {
            url: format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                self.base_url, config.model
            ),
            headers: vec![("content-type".into(), "application/json".into())],
            body,
        })
    }

    fn parse_sse_event(&mut self, record: &SseEvent) -> Vec<AgentEvent> {
        let chunk: serde_json::Value = match serde_json::from_str(&record.data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data = %record.data, "Ignoring unparseable Gemini SSE");
                return Vec::new();
            }
        };

        let mut out = Vec::new();

        if let Some(error) = chunk.get("error") {
            let message = error["message"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            out.push(AgentEvent::Error { error: message });
            return out;
        }

        if !self.state.started {
            self.state.started = true;
            out.push(AgentEvent::MessageStart);
        }

        let usage = &chunk["usageMetadata"];
        if usage.is_object() {
            let output = usage["candidatesTokenCount"].as_u64().unwrap_or(0)
                + usage["thoughtsTokenCount"].as_u64().unwrap_or(0);
            self.state.usage = Some(TokenUsage::new(
                usage["promptTokenCount"].as_u64().unwrap_or(0),
                output,
            ));
        }

        let candidate = &chunk["candidates"][0];
        if let Some(parts) = candidate["content"]["parts"].as_array() {
            for part in parts {
                self.on_part(part, &mut out);
            }
        }

        if let Some(reason) = candidate["finishReason"].as_str() {
            let stop_reason = Self::map_finish_reason(reason, self.state.saw_function_call);
            self.finish_turn(stop_reason, &mut out);
        } else if chunk["promptFeedback"]["blockReason"].is_string() && candidate.is_null() {
            self.finish_turn(StopReason::ContentFilter, &mut out);
        }

        if self.state.finished && !self.state.usage_emitted {
            if let Some(usage) = self.state.usage {
                self.state.usage_emitted = true;
                out.push(AgentEvent::Usage { usage, cost: None });
            }
        }

        out
    }

    fn estimate_cost(&self, model: &str, usage: &TokenUsage) -> Result<CostEstimate, ProviderError> {
        self.pricing.estimate(model, usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> GeminiAdapter {
        GeminiAdapter::new(Arc::new(PricingTable::with_defaults()))
    }

    fn data(value: serde_json::Value) -> SseEvent {
        SseEvent::new(None, value.to_string())
    }

    #[test]
    fn text_stream_emits_single_usage() {
        let mut adapter = adapter();
        let records = [
            data(serde_json::json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "Hel"}]}, "index": 0}],
                "usageMetadata": {"promptTokenCount": 8, "candidatesTokenCount": 1}
            })),
            data(serde_json::json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "lo!"}]}, "finishReason": "STOP", "index": 0}],
                "usageMetadata": {"promptTokenCount": 8, "candidatesTokenCount": 3, "totalTokenCount": 11}
            })),
        ];
        let events: Vec<_> = records.iter().flat_map(|r| adapter.parse_sse_event(r)).collect();

        assert_eq!(
            events,
            vec![
                AgentEvent::MessageStart,
                AgentEvent::TextDelta { text: "Hel".into() },
                AgentEvent::TextDelta { text: "lo!".into() },
                AgentEvent::TextDone {
                    text: "Hello!".into()
                },
                AgentEvent::TurnEnd {
                    stop_reason: StopReason::EndTurn
                },
                AgentEvent::Usage {
                    usage: TokenUsage::new(8, 3),
                    cost: None
                },
            ]
        );
    }

    #[test]
    fn function_call_gets_synthetic_id_and_signature() {
        let mut adapter = adapter();
        let events = adapter.parse_sse_event(&data(serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking out loud", "thought": true},
                    {"functionCall": {"name": "runjs", "args": {"code": "2+2"}}, "thoughtSignature": "sig-abc"}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 20, "candidatesTokenCount": 5, "thoughtsTokenCount": 7}
        })));

        let (start_id, done) = match (&events[1], &events[2]) {
            (
                AgentEvent::ToolUseStart { tool_use_id, .. },
                AgentEvent::ToolUseDone {
                    tool_use_id: done_id,
                    tool_name,
                    input,
                    thought_signature,
                },
            ) => {
                assert_eq!(tool_use_id, done_id);
                (
                    tool_use_id.clone(),
                    (tool_name.clone(), input.clone(), thought_signature.clone()),
                )
            }
            other => panic!("unexpected events: {other:?}"),
        };
        assert!(start_id.starts_with("call_"));
        assert_eq!(
            done,
            (
                "runjs".to_string(),
                serde_json::json!({"code": "2+2"}),
                Some("sig-abc".to_string())
            )
        );
        assert!(events.contains(&AgentEvent::TurnEnd {
            stop_reason: StopReason::ToolUse
        }));
        assert!(events.contains(&AgentEvent::Usage {
            usage: TokenUsage::new(20, 12),
            cost: None
        }));
        assert!(!events.iter().any(|e| matches!(e, AgentEvent::TextDelta { .. })));
    }

    #[test]
    fn text_around_function_call_keeps_part_order() {
        let mut adapter = adapter();
        let records = [
            data(serde_json::json!({
                "candidates": [{"content": {"role": "model", "parts": [
                    {"text": "Let me check."},
                    {"functionCall": {"name": "runjs", "args": {"code": "1+1"}}, "thoughtSignature": "sig-1"}
                ]}}]
            })),
            data(serde_json::json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "Running it now."}]}, "finishReason": "STOP"}],
                "usageMetadata": {"promptTokenCount": 30, "candidatesTokenCount": 9}
            })),
        ];
        let events: Vec<_> = records.iter().flat_map(|r| adapter.parse_sse_event(r)).collect();

        let kinds: Vec<&str> = events.iter().map(AgentEvent::event_type).collect();
        assert_eq!(
            kinds,
            vec![
                "message_start",
                "text_delta",
                "text_done",
                "tool_use_start",
                "tool_use_done",
                "text_delta",
                "text_done",
                "turn_end",
                "usage",
            ]
        );
        let done_texts: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::TextDone { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(done_texts, vec!["Let me check.", "Running it now."]);
        assert!(events.contains(&AgentEvent::TurnEnd {
            stop_reason: StopReason::ToolUse
        }));
    }

    #[test]
    fn safety_block_maps_to_content_filter() {
        assert_eq!(
            GeminiAdapter::map_finish_reason("SAFETY", false),
            StopReason::ContentFilter
        );
        assert_eq!(GeminiAdapter::map_finish_reason("MAX_TOKENS", true), StopReason::MaxTokens);
        assert_eq!(
            GeminiAdapter::map_finish_reason("MALFORMED_FUNCTION_CALL", false),
            StopReason::Other("MALFORMED_FUNCTION_CALL".into())
        );
    }

    #[test]
    fn reset_state_forgets_function_calls() {
        let mut adapter = adapter();
        adapter.parse_sse_event(&data(serde_json::json!({
            "candidates": [{"content": {"parts": [{"functionCall": {"name": "runjs", "args": {}}}]}}]
        })));
        adapter.reset_state();
        let events = adapter.parse_sse_event(&data(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "done"}]}, "finishReason": "STOP"}]
        })));
        assert!(events.contains(&AgentEvent::TurnEnd {
            stop_reason: StopReason::EndTurn
        }));
    }

    #[test]
    fn build_request_maps_tool_results_by_name() {
        let adapter = adapter();
        let mut call = ContentBlock::tool_use("call_1", "runjs", serde_json::json!({"code": "2+2"}));
        if let ContentBlock::ToolUse {
            thought_signature, ..
        } = &mut call
        {
            *thought_signature = Some("sig-abc".into());
        }
        let history = vec![
            Message::user("Calculate 2+2"),
            Message::assistant_blocks(vec![call]),
            Message::tool_results(vec![ContentBlock::tool_result("call_1", "4", false)]),
        ];
        let tools = vec![ToolDefinition {
            name: "runjs".into(),
            description: "Run JavaScript".into(),
            parameters: serde_json::json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "type": "object",
                "properties": {"code": {"type": "string"}},
                "additionalProperties": false
            }),
        }];
        let config = AgentConfig::new("gemini-2.5-flash")
            .with_system_prompt("Be terse")
            .with_max_tokens(1024);

        let req = adapter.build_request(&history, &tools, &config).unwrap();
        assert_eq!(
            req.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse"
        );
        assert!(req.header("x-goog-api-key").is_none());

        let body = &req.body;
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be terse");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
        let decl = &body["tools"][0]["functionDeclarations"][0];
        assert_eq!(decl["name"], "runjs");
        assert!(decl["parameters"].get("$schema").is_none());
        assert!(decl["parameters"].get("additionalProperties").is_none());

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["thoughtSignature"], "sig-abc");
        assert_eq!(contents[2]["parts"][0]["functionResponse"]["name"], "runjs");
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"]["response"]["result"],
            "4"
        );
    }

    #[test]
    fn orphan_tool_result_is_invalid_request() {
        let history = vec![Message::tool_results(vec![ContentBlock::tool_result(
            "missing", "x", false,
        )])];
        let err = adapter()
            .build_request(&history, &[], &AgentConfig::new("gemini-2.5-flash"))
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[test]
    fn error_chunk() {
        let mut adapter = adapter();
        let events = adapter.parse_sse_event(&data(serde_json::json!({
            "error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}
        })));
        assert_eq!(
            events,
            vec![AgentEvent::Error {
                error: "API key not valid".into()
            }]
        );
    }
}
