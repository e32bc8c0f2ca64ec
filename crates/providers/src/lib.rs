//! Vendor adapters and HTTP transport for streamloop.
//!
//! All adapters implement `streamloop_core::ProviderAdapter`. The router
//! selects the adapter and transport from configuration.

pub mod anthropic;
pub mod gemini;
pub mod openai_compat;
pub mod router;
mod shared;
pub mod sse;
pub mod transport;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai_compat::OpenAiAdapter;
pub use router::{auth_scheme, build_adapter, build_from_config, pricing_from_config};
pub use sse::SseTokenizer;
pub use transport::{AuthScheme, HttpTransport};
