//! In-memory backend: a `DashMap` keyed store used for tests and the
//! gateway's ephemeral "web-console" sessions (§4.2). Nothing here is ever
//! serialized, so there are no legacy-payload concerns.

use crate::error::{Error, Result};
use crate::store::{session_mentions_agent, SessionStore};
use agent_core::{Session, SessionKey};
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Default)]
pub struct InMemoryStore {
    sessions: DashMap<SessionKey, Session>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn add(&self, session: Session) -> Result<()> {
        if session.id.as_str().is_empty() {
            return Err(Error::EmptyId);
        }
        if self.sessions.contains_key(&session.id) {
            return Err(Error::AlreadyExists(session.id.to_string()));
        }
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, id: &SessionKey) -> Result<Session> {
        self.sessions
            .get(id)
            .map(|s| s.clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn update(&self, session: Session) -> Result<()> {
        if !self.sessions.contains_key(&session.id) {
            return Err(Error::NotFound(session.id.to_string()));
        }
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn delete(&self, id: &SessionKey) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Session>> {
        Ok(self.sessions.iter().map(|e| e.value().clone()).collect())
    }

    async fn list_by_agent(&self, filename: &str) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .iter()
            .map(|e| e.value().clone())
            .filter(|s| session_mentions_agent(s, filename))
            .collect())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .iter()
            .map(|e| e.value().clone())
            .filter(|s| s.user_id.as_deref() == Some(user_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::Message;

    fn session(id: &str) -> Session {
        Session::new(SessionKey::new(id), "/tmp")
    }

    #[tokio::test]
    async fn add_requires_nonempty_id() {
        let store = InMemoryStore::new();
        let s = session("");
        assert!(matches!(store.add(s).await, Err(Error::EmptyId)));
    }

    #[tokio::test]
    async fn get_unknown_fails_not_found() {
        let store = InMemoryStore::new();
        let err = store.get(&SessionKey::new("ghost")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn add_then_get_roundtrips() {
        let store = InMemoryStore::new();
        let mut s = session("s1");
        s.push_message(Message::user("hi"));
        store.add(s).await.unwrap();
        let fetched = store.get(&SessionKey::new("s1")).await.unwrap();
        assert_eq!(fetched.items.len(), 1);
    }

    #[tokio::test]
    async fn list_by_agent_filters_on_message_attribution() {
        let store = InMemoryStore::new();
        let mut s = session("s1");
        s.push_message(Message::assistant("hi").with_agent("worker", "worker.yaml"));
        store.add(s).await.unwrap();
        store.add(session("s2")).await.unwrap();

        let found = store.list_by_agent("worker.yaml").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id.as_str(), "s1");
    }

    #[tokio::test]
    async fn is_owned_by_false_for_unknown_session() {
        let store = InMemoryStore::new();
        assert!(!store.is_owned_by(&SessionKey::new("ghost"), "u1").await.unwrap());
    }
}
