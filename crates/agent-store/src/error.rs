//! `agent-store::Error` — the crate-local error enum for the session store.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session id must be non-empty")]
    EmptyId,

    #[error("session already exists: {0}")]
    AlreadyExists(String),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sql: {0}")]
    Sql(#[from] sqlx::Error),
}
