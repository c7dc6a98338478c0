//! The `SessionStore` trait (§4.2) — a pluggable CRUD interface the runtime
//! is built against. Two backends ship in this crate: [`crate::memory::InMemoryStore`]
//! and [`crate::sqlite::SqliteStore`].

use crate::error::Result;
use agent_core::{Session, SessionKey};
use async_trait::async_trait;

/// Operations every backend implements. `Send + Sync` so a single store can
/// be shared behind `Arc<dyn SessionStore>` across runtimes and the gateway.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a brand-new session. Fails with [`crate::Error::EmptyId`] if
    /// `session.id` is empty, or [`crate::Error::AlreadyExists`] if the id
    /// is already present.
    async fn add(&self, session: Session) -> Result<()>;

    /// Fetch a session by id. Fails with [`crate::Error::NotFound`] if unknown.
    async fn get(&self, id: &SessionKey) -> Result<Session>;

    /// Overwrite a session with the same id. Fails with
    /// [`crate::Error::NotFound`] if the session was never added.
    async fn update(&self, session: Session) -> Result<()>;

    /// Remove a session. A no-op (not an error) if it doesn't exist, matching
    /// the idempotent-delete convention most session stores adopt.
    async fn delete(&self, id: &SessionKey) -> Result<()>;

    /// All sessions in the store, in an unspecified order.
    async fn list(&self) -> Result<Vec<Session>>;

    /// Sessions whose direct messages include at least one produced by the
    /// agent with this `agent_filename`.
    async fn list_by_agent(&self, filename: &str) -> Result<Vec<Session>>;

    /// Sessions owned by the given user id.
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Session>>;

    /// Whether `user_id` owns `session_id`. `false` (not an error) if the
    /// session doesn't exist.
    async fn is_owned_by(&self, session_id: &SessionKey, user_id: &str) -> Result<bool> {
        match self.get(session_id).await {
            Ok(session) => Ok(session.user_id.as_deref() == Some(user_id)),
            Err(crate::Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// True if any direct message in the session was produced by `agent_filename`.
pub(crate) fn session_mentions_agent(session: &Session, agent_filename: &str) -> bool {
    session.messages().any(|m| m.agent_filename == agent_filename)
}
