//! The streamloop agent loop.
//!
//! One invocation runs a **request → stream → act** cycle:
//!
//! 1. **Request**: the adapter encodes the history and tools for its vendor
//! 2. **Stream**: SSE records are normalized into `AgentEvent`s and forwarded
//! 3. **Act**: tool calls (structured, or recovered from text) are executed
//!    in order and their results appended to the history
//!
//! The cycle repeats until a turn ends without tool use, a token, cost or
//! iteration budget fires, or the transport fails.

pub mod loop_runner;
pub mod text_fallback;

pub use loop_runner::{AgentLoop, LoopOutcome, Termination};
pub use text_fallback::{extract_balanced_json, recover_tool_calls};
