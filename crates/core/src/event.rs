//! Canonical agent events and the sinks that receive them.
//!
//! Every vendor stream is normalized into [`AgentEvent`]s. The loop forwards
//! them to an [`EventSink`]; sinks are fire-and-forget and must never block.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::provider::{CostEstimate, TokenUsage};

/// Why a turn ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    ContentFilter,
    /// A vendor reason with no canonical equivalent.
    Other(String),
}

impl StopReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
            Self::MaxTokens => "max_tokens",
            Self::StopSequence => "stop_sequence",
            Self::ContentFilter => "content_filter",
            Self::Other(s) => s,
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which limit halted the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetReason {
    TokenLimit,
    CostLimit,
    IterationLimit,
}

impl std::fmt::Display for BudgetReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TokenLimit => write!(f, "token_limit"),
            Self::CostLimit => write!(f, "cost_limit"),
            Self::IterationLimit => write!(f, "iteration_limit"),
        }
    }
}

/// Events emitted during a loop invocation.
///
/// Adapters produce the streaming variants; the loop adds `ToolResult`,
/// `BudgetExceeded` and the cumulative form of `Usage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The model started a response.
    MessageStart,

    /// Partial text from the model.
    TextDelta { text: String },

    /// A text block is complete.
    TextDone { text: String },

    /// The model started a tool call.
    ToolUseStart {
        tool_use_id: String,
        tool_name: String,
    },

    /// A tool call is complete with its parsed input.
    ToolUseDone {
        tool_use_id: String,
        tool_name: String,
        input: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought_signature: Option<String>,
    },

    /// Token usage. From an adapter this is one API call; from the loop it is
    /// the running total with its cost.
    Usage {
        usage: TokenUsage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cost: Option<CostEstimate>,
    },

    /// The provider finished the turn.
    TurnEnd { stop_reason: StopReason },

    /// A tool call finished executing.
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },

    /// A transport or provider failure.
    Error { error: String },

    /// A budget halted the loop.
    BudgetExceeded {
        reason: BudgetReason,
        message: String,
    },
}

impl AgentEvent {
    /// Event name for this event type (matches the serialized `type` tag).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageStart => "message_start",
            Self::TextDelta { .. } => "text_delta",
            Self::TextDone { .. } => "text_done",
            Self::ToolUseStart { .. } => "tool_use_start",
            Self::ToolUseDone { .. } => "tool_use_done",
            Self::Usage { .. } => "usage",
            Self::TurnEnd { .. } => "turn_end",
            Self::ToolResult { .. } => "tool_result",
            Self::Error { .. } => "error",
            Self::BudgetExceeded { .. } => "budget_exceeded",
        }
    }
}

/// Receives events from the loop. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AgentEvent);
}

impl<F> EventSink for F
where
    F: Fn(AgentEvent) + Send + Sync,
{
    fn emit(&self, event: AgentEvent) {
        self(event)
    }
}

/// A broadcast-based event bus.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Slow subscribers
/// lag and lose events rather than stalling the loop.
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: AgentEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }
}

/// A single-consumer sink over an unbounded channel.
#[derive(Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: AgentEvent) {
        let _ = self.sender.send(event);
    }
}
