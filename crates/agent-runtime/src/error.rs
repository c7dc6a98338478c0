//! Runtime-local error kinds (§7). Config/validation errors live upstream in
//! `agent_core::Error`; this crate's enum covers failures intrinsic to
//! driving a `RunStream`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("iteration cap reached after {0} iterations")]
    IterationCapReached(u32),

    #[error("cancelled")]
    Cancelled,

    #[error("model error: {0}")]
    Model(#[from] agent_llm::LlmError),

    #[error(transparent)]
    Core(#[from] agent_core::Error),

    #[error("store error: {0}")]
    Store(#[from] agent_store::Error),

    #[error("malformed instruction tool placeholder: {0}")]
    MalformedToolPlaceholder(String),

    #[error("tool error: {0}")]
    Tool(#[from] agent_tools::ToolError),
}
