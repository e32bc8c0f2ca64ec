//! # streamloop core
//!
//! Domain types, collaborator traits, and error definitions for the streamloop
//! agentic loop. Nothing here performs I/O.
//!
//! The loop is built from three seams, each a trait defined here:
//! - [`ProviderAdapter`]: vendor request shape and SSE parsing
//! - [`Transport`]: moving bytes to and from the vendor
//! - [`ToolExecutor`]: running the tools the model asks for
//!
//! Events flow out through an [`EventSink`].

pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;
pub mod transport;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_TOKENS};
pub use error::{Error, ProviderError, Result, ToolError, TransportError};
pub use event::{AgentEvent, BudgetReason, ChannelSink, EventBus, EventSink, StopReason};
pub use message::{ContentBlock, Message, Role, tool_name_for_id};
pub use provider::{
    CostEstimate, HttpRequest, ProviderAdapter, SseEvent, TokenUsage, ToolDefinition,
};
pub use tool::{Tool, ToolContent, ToolExecutor, ToolOutput, ToolRegistry};
pub use transport::{ChunkStream, Transport};
