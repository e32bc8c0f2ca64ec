//! The agent loop runner: request, stream, run tools, repeat.

use std::sync::Arc;

use serde::Serialize;
use streamloop_core::{
    AgentConfig, AgentEvent, BudgetReason, ContentBlock, CostEstimate, EventSink, HttpRequest,
    Message, ProviderAdapter, StopReason, TokenUsage, ToolExecutor, Transport,
};
use streamloop_providers::SseTokenizer;
use streamloop_telemetry::{BudgetBreach, BudgetTracker};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::text_fallback;

/// How a loop invocation ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Termination {
    /// A turn ended without asking for tools.
    Completed { stop_reason: StopReason },
    /// A token, cost or iteration limit fired.
    BudgetExceeded { reason: BudgetReason },
    /// The transport or provider failed; the history holds completed turns only.
    Failed { error: String },
}

/// Everything a caller needs after `AgentLoop::run` returns.
#[derive(Debug, Clone, Serialize)]
pub struct LoopOutcome {
    /// Full history snapshot, including the caller's prior messages
    pub messages: Vec<Message>,

    /// Cumulative usage across every request of this invocation
    pub usage: TokenUsage,

    /// Cost of `usage`, when the model is priced
    pub cost: Option<CostEstimate>,

    /// Requests issued
    pub iterations: u32,

    pub termination: Termination,
}

impl LoopOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self.termination, Termination::Completed { .. })
    }

    /// Text of the last assistant message, if it has any.
    pub fn final_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == streamloop_core::Role::Assistant)
            .map(Message::text)
            .filter(|t| !t.is_empty())
    }
}

/// The streaming agent loop.
///
/// Owns one provider adapter and drives it turn by turn. The adapter's
/// per-turn state is reset before every request, so an `AgentLoop` can be
/// reused for successive invocations, one at a time.
pub struct AgentLoop {
    /// Vendor request/response translation
    adapter: Box<dyn ProviderAdapter>,

    /// Carries requests to the vendor and streams back body text
    transport: Arc<dyn Transport>,

    /// Runs the tools the model asks for
    tools: Arc<dyn ToolExecutor>,

    /// Receives every event of the invocation
    sink: Arc<dyn EventSink>,
}

/// What the model produced in one turn.
#[derive(Debug, Default)]
struct Turn {
    content: Vec<ContentBlock>,
    stop_reason: Option<StopReason>,
}

enum TurnOutcome {
    Finished(Turn),
    Halted { turn: Turn, breach: BudgetBreach },
    Failed(String),
}

struct PendingCall {
    id: String,
    name: String,
    input: serde_json::Value,
}

impl AgentLoop {
    /// Create a loop that discards its events.
    pub fn new(
        adapter: Box<dyn ProviderAdapter>,
        transport: Arc<dyn Transport>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            adapter,
            transport,
            tools,
            sink: Arc::new(|_: AgentEvent| {}),
        }
    }

    /// Send events to the given sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.adapter.name()
    }

    /// Run one invocation: append `user_message` to `history` and loop until
    /// a turn ends without tool use, a budget fires, or the transport fails.
    ///
    /// Never returns an error. Failures are reported through the sink and
    /// `LoopOutcome::termination`, and the returned history is always
    /// consistent: every `tool_result` answers a `tool_use` in the message
    /// before it.
    pub async fn run(
        &mut self,
        history: Vec<Message>,
        user_message: Message,
        config: &AgentConfig,
        cancel: CancellationToken,
    ) -> LoopOutcome {
        let mut messages = history;
        messages.push(user_message);

        let mut budget = BudgetTracker::from_config(config);
        let tool_names: Vec<&str> = config.tools.iter().map(|t| t.name.as_str()).collect();

        let priced = match self
            .adapter
            .estimate_cost(&config.model, &TokenUsage::default())
        {
            Ok(_) => true,
            Err(e) if budget.has_cost_budget() => {
                return self.fail(messages, &budget, e.to_string());
            }
            Err(e) => {
                warn!(model = %config.model, error = %e, "Model is not priced, cost will not be reported");
                false
            }
        };

        loop {
            let iteration = match budget.begin_iteration() {
                Ok(n) => n,
                Err(breach) => return self.halt(messages, &budget, breach),
            };

            self.adapter.reset_state();
            let request = match self
                .adapter
                .build_request(&messages, &config.tools, config)
            {
                Ok(request) => request,
                Err(e) => return self.fail(messages, &budget, e.to_string()),
            };

            info!(
                provider = %self.adapter.name(),
                model = %config.model,
                iteration = iteration,
                messages = messages.len(),
                "Issuing request"
            );

            let mut turn = match self
                .stream_turn(request, config, priced, &mut budget, cancel.clone())
                .await
            {
                TurnOutcome::Finished(turn) => turn,
                TurnOutcome::Halted { mut turn, breach } => {
                    // Unanswered tool calls would leave the history inconsistent
                    turn.content
                        .retain(|b| matches!(b, ContentBlock::Text { .. }));
                    if !turn.content.is_empty() {
                        messages.push(Message::assistant_blocks(turn.content));
                    }
                    return self.halt(messages, &budget, breach);
                }
                TurnOutcome::Failed(error) => return self.fail(messages, &budget, error),
            };

            let has_tool_use = turn
                .content
                .iter()
                .any(|b| matches!(b, ContentBlock::ToolUse { .. }));
            let has_text = turn
                .content
                .iter()
                .any(|b| matches!(b, ContentBlock::Text { .. }));
            if !has_tool_use && has_text && !tool_names.is_empty() {
                let recovered = text_fallback::recover_tool_calls(&mut turn.content, &tool_names);
                if !recovered.is_empty() {
                    turn.content.extend(recovered);
                    turn.stop_reason = Some(StopReason::ToolUse);
                }
            }

            let stop_reason = turn.stop_reason.unwrap_or_else(|| {
                debug!(iteration = iteration, "Stream ended without a stop reason");
                StopReason::EndTurn
            });

            let calls: Vec<PendingCall> = turn
                .content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse {
                        id, name, input, ..
                    } => Some(PendingCall {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    }),
                    _ => None,
                })
                .collect();

            if !turn.content.is_empty() {
                messages.push(Message::assistant_blocks(turn.content));
            }

            if stop_reason != StopReason::ToolUse || calls.is_empty() {
                info!(
                    iterations = budget.iterations(),
                    stop_reason = %stop_reason,
                    input_tokens = budget.usage().input_tokens,
                    output_tokens = budget.usage().output_tokens,
                    "Loop completed"
                );
                return Self::outcome(messages, &budget, Termination::Completed { stop_reason });
            }

            debug!(tool_count = calls.len(), "Executing tool calls");
            let results = self.execute_tools(calls).await;
            messages.push(Message::tool_results(results));
        }
    }

    /// Issue one request and consume its stream.
    async fn stream_turn(
        &mut self,
        request: HttpRequest,
        config: &AgentConfig,
        priced: bool,
        budget: &mut BudgetTracker,
        cancel: CancellationToken,
    ) -> TurnOutcome {
        let mut chunks = match self.transport.send(request, cancel).await {
            Ok(chunks) => chunks,
            Err(e) => return TurnOutcome::Failed(e.to_string()),
        };

        let mut tokenizer = SseTokenizer::new();
        let mut turn = Turn::default();

        while let Some(chunk) = chunks.recv().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return TurnOutcome::Failed(e.to_string()),
            };

            for record in tokenizer.feed(&chunk) {
                trace!(event = ?record.event, "SSE record");
                for event in self.adapter.parse_sse_event(&record) {
                    match event {
                        AgentEvent::Usage { usage, .. } => {
                            let cumulative = budget.record_usage(usage);
                            let cost = if priced {
                                match self.adapter.estimate_cost(&config.model, &cumulative) {
                                    Ok(cost) => {
                                        budget.record_cost(cost);
                                        Some(cost)
                                    }
                                    Err(e) => return TurnOutcome::Failed(e.to_string()),
                                }
                            } else {
                                None
                            };
                            self.sink.emit(AgentEvent::Usage {
                                usage: cumulative,
                                cost,
                            });

                            if let Some(breach) = budget.check() {
                                return TurnOutcome::Halted { turn, breach };
                            }
                        }
                        AgentEvent::Error { error } => return TurnOutcome::Failed(error),
                        AgentEvent::TextDone { ref text } => {
                            turn.content.push(ContentBlock::text(text.clone()));
                            self.sink.emit(event);
                        }
                        AgentEvent::ToolUseDone {
                            ref tool_use_id,
                            ref tool_name,
                            ref input,
                            ref thought_signature,
                        } => {
                            turn.content.push(ContentBlock::ToolUse {
                                id: tool_use_id.clone(),
                                name: tool_name.clone(),
                                input: input.clone(),
                                thought_signature: thought_signature.clone(),
                            });
                            self.sink.emit(event);
                        }
                        AgentEvent::TurnEnd { ref stop_reason } => {
                            turn.stop_reason = Some(stop_reason.clone());
                            self.sink.emit(event);
                        }
                        other => self.sink.emit(other),
                    }
                }
            }
        }

        TurnOutcome::Finished(turn)
    }

    /// Run tool calls one at a time, in order. Executor errors become error
    /// results and never stop the loop.
    async fn execute_tools(&self, calls: Vec<PendingCall>) -> Vec<ContentBlock> {
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            debug!(tool = %call.name, tool_use_id = %call.id, "Executing tool");

            let (content, is_error) = match self.tools.execute(&call.name, call.input).await {
                Ok(output) => {
                    let is_error = output.is_error;
                    (output.content.into_text(), is_error)
                }
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool execution failed");
                    (e.to_string(), true)
                }
            };

            self.sink.emit(AgentEvent::ToolResult {
                tool_use_id: call.id.clone(),
                content: content.clone(),
                is_error,
            });
            results.push(ContentBlock::tool_result(call.id, content, is_error));
        }

        results
    }

    fn halt(&self, messages: Vec<Message>, budget: &BudgetTracker, breach: BudgetBreach) -> LoopOutcome {
        warn!(
            reason = %breach.reason,
            iterations = budget.iterations(),
            tokens = budget.usage().total(),
            "{}",
            breach.message
        );
        self.sink.emit(AgentEvent::BudgetExceeded {
            reason: breach.reason,
            message: breach.message,
        });
        Self::outcome(
            messages,
            budget,
            Termination::BudgetExceeded {
                reason: breach.reason,
            },
        )
    }

    fn fail(&self, messages: Vec<Message>, budget: &BudgetTracker, error: String) -> LoopOutcome {
        error!(
            provider = %self.adapter.name(),
            iteration = budget.iterations(),
            error = %error,
            "Request failed"
        );
        self.sink.emit(AgentEvent::Error {
            error: error.clone(),
        });
        Self::outcome(messages, budget, Termination::Failed { error })
    }

    fn outcome(messages: Vec<Message>, budget: &BudgetTracker, termination: Termination) -> LoopOutcome {
        LoopOutcome {
            messages,
            usage: budget.usage(),
            cost: budget.cost(),
            iterations: budget.iterations(),
            termination,
        }
    }
}
