//! `agent-tools::ToolError` — the crate-local error enum for tool
//! construction and dispatch failures, as distinct from `ToolResult::Error`
//! (a recoverable in-band result the model sees and can react to).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolError>;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool in policy: {0}")]
    UnknownTool(String),

    #[error("tool panicked: {0}")]
    PanicCaught(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
