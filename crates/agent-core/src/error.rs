//! Shared error type for configuration and data-model failures.
//!
//! Runtime-local errors (tool dispatch, model streaming, persistence) live in
//! their own crates' `Error` enums and convert into an `Event::Error` at the
//! point they cross into the event stream; this type covers failures that can
//! occur before a runtime even exists (config load/validation) or that are
//! intrinsic to the data model itself (session/item invariants).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config: {0}")]
    Config(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("malformed workflow step {step_id}: {reason}")]
    MalformedWorkflowStep { step_id: String, reason: String },

    #[error("malformed instruction tool placeholder: {0}")]
    MalformedToolPlaceholder(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session id must be non-empty")]
    EmptySessionId,

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
