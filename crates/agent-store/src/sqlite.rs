//! SQLite-backed store (§4.2, §6) — the reference backend. Uses `sqlx`'s
//! async pool rather than a sync driver (`rusqlite`) because every other I/O
//! boundary in this runtime (model streaming, tool execution, gateway
//! sockets) is already `tokio`-async; a sync driver would force
//! `spawn_blocking` wrapping at every call site for no benefit.
//!
//! WAL mode is enabled on pool creation. Writes funnel through a single
//! `tokio::sync::Mutex` held by the store (not per-connection), satisfying
//! the single-writer contract; reads use the pool directly and may run
//! concurrently with a pending write.

use crate::error::{Error, Result};
use crate::store::{session_mentions_agent, SessionStore};
use agent_core::{Item, Message, Session, SessionKey};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::debug;

pub struct SqliteStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open (creating if absent) a SQLite database at `path` and run
    /// migrations. Pass `":memory:"` for an ephemeral store.
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new().max_connections(8).connect_with(options).await?;
        let store = Self { pool, write_lock: Mutex::new(()) };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                user_id TEXT,
                title TEXT NOT NULL DEFAULT '',
                messages_json TEXT NOT NULL,
                tools_approved INTEGER NOT NULL DEFAULT 0,
                send_user_message INTEGER NOT NULL DEFAULT 1,
                max_iterations INTEGER NOT NULL DEFAULT 0,
                thinking INTEGER NOT NULL DEFAULT 0,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                cost REAL NOT NULL DEFAULT 0.0,
                working_dir TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
        let id: String = row.try_get("id")?;
        let parent_id: Option<String> = row.try_get("parent_id")?;
        let user_id: Option<String> = row.try_get("user_id")?;
        let title: String = row.try_get("title")?;
        let messages_json: String = row.try_get("messages_json")?;
        let tools_approved: bool = row.try_get::<i64, _>("tools_approved")? != 0;
        let send_user_message: bool = row.try_get::<i64, _>("send_user_message")? != 0;
        let max_iterations: i64 = row.try_get("max_iterations")?;
        let thinking: bool = row.try_get::<i64, _>("thinking")? != 0;
        let input_tokens: i64 = row.try_get("input_tokens")?;
        let output_tokens: i64 = row.try_get("output_tokens")?;
        let cost: f64 = row.try_get("cost")?;
        let working_dir: String = row.try_get("working_dir")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Session {
            id: SessionKey::new(id),
            parent_id: parent_id.map(SessionKey::new),
            user_id,
            title,
            items: deserialize_items(&messages_json)?,
            tools_approved,
            send_user_message,
            max_iterations: max_iterations as u32,
            thinking,
            working_dir,
            input_tokens: input_tokens as u64,
            output_tokens: output_tokens as u64,
            cost,
            created_at: created_at.parse().unwrap_or_else(|_| chrono::Utc::now()),
        })
    }

    async fn upsert(&self, session: &Session) -> Result<()> {
        let messages_json = serde_json::to_string(&session.items)?;
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, parent_id, user_id, title, messages_json, tools_approved,
                send_user_message, max_iterations, thinking, input_tokens,
                output_tokens, cost, working_dir, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                parent_id = excluded.parent_id,
                user_id = excluded.user_id,
                title = excluded.title,
                messages_json = excluded.messages_json,
                tools_approved = excluded.tools_approved,
                send_user_message = excluded.send_user_message,
                max_iterations = excluded.max_iterations,
                thinking = excluded.thinking,
                input_tokens = excluded.input_tokens,
                output_tokens = excluded.output_tokens,
                cost = excluded.cost,
                working_dir = excluded.working_dir
            "#,
        )
        .bind(session.id.as_str())
        .bind(session.parent_id.as_ref().map(|p| p.as_str()))
        .bind(session.user_id.as_deref())
        .bind(&session.title)
        .bind(&messages_json)
        .bind(session.tools_approved as i64)
        .bind(session.send_user_message as i64)
        .bind(session.max_iterations as i64)
        .bind(session.thinking as i64)
        .bind(session.input_tokens as i64)
        .bind(session.output_tokens as i64)
        .bind(session.cost)
        .bind(&session.working_dir)
        .bind(session.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Deserialize `messages_json`, transparently lifting the legacy flat
/// `[]Message` shape to `[]Item` (§4.2 backward compatibility).
fn deserialize_items(raw: &str) -> Result<Vec<Item>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<Vec<Item>>(raw) {
        Ok(items) => Ok(items),
        Err(_) => {
            debug!("messages_json is not tagged []Item, trying legacy []Message shape");
            let messages: Vec<Message> = serde_json::from_str(raw)?;
            Ok(messages.into_iter().map(Item::Message).collect())
        }
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn add(&self, session: Session) -> Result<()> {
        if session.id.as_str().is_empty() {
            return Err(Error::EmptyId);
        }
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM sessions WHERE id = ?")
            .bind(session.id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_some() {
            return Err(Error::AlreadyExists(session.id.to_string()));
        }
        self.upsert(&session).await
    }

    async fn get(&self, id: &SessionKey) -> Result<Session> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        Self::row_to_session(&row)
    }

    async fn update(&self, session: Session) -> Result<()> {
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM sessions WHERE id = ?")
            .bind(session.id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(Error::NotFound(session.id.to_string()));
        }
        self.upsert(&session).await
    }

    async fn delete(&self, id: &SessionKey) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM sessions WHERE id = ?").bind(id.as_str()).execute(&self.pool).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query("SELECT * FROM sessions").fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_session).collect()
    }

    async fn list_by_agent(&self, filename: &str) -> Result<Vec<Session>> {
        Ok(self.list().await?.into_iter().filter(|s| session_mentions_agent(s, filename)).collect())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let rows = sqlx::query("SELECT * FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_session).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::Message;

    async fn store() -> SqliteStore {
        SqliteStore::connect(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn add_get_roundtrip() {
        let store = store().await;
        let mut s = Session::new(SessionKey::new("s1"), "/tmp");
        s.push_message(Message::user("hi"));
        store.add(s).await.unwrap();

        let fetched = store.get(&SessionKey::new("s1")).await.unwrap();
        assert_eq!(fetched.items.len(), 1);
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let store = store().await;
        assert!(matches!(store.get(&SessionKey::new("ghost")).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn legacy_flat_message_array_is_lifted() {
        let store = store().await;
        let legacy = serde_json::to_string(&vec![Message::user("hi")]).unwrap();
        sqlx::query(
            "INSERT INTO sessions (id, messages_json, created_at) VALUES (?, ?, ?)",
        )
        .bind("legacy")
        .bind(&legacy)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&store.pool)
        .await
        .unwrap();

        let session = store.get(&SessionKey::new("legacy")).await.unwrap();
        assert_eq!(session.items.len(), 1);
        assert!(matches!(session.items[0], Item::Message(_)));
    }

    #[tokio::test]
    async fn update_unknown_session_fails() {
        let store = store().await;
        let s = Session::new(SessionKey::new("ghost"), "/tmp");
        assert!(matches!(store.update(s).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn concurrent_writers_serialize() {
        let store = std::sync::Arc::new(store().await);
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let s = Session::new(SessionKey::new(format!("s{i}")), "/tmp");
                store.add(s).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.list().await.unwrap().len(), 20);
    }
}
