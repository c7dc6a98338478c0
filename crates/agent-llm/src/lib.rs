//! Model provider adapters with streaming support (§4.4).

pub mod anthropic;
pub mod provider;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use provider::{LlmError, LlmResult, LlmStream, ModelProvider};
pub use types::*;
