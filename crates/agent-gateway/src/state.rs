//! Shared state for the gateway's Axum handlers (§6.1).

use crate::auth::ResolvedAuth;
use agent_core::{Event, SessionKey};
use agent_runtime::{PersistentRuntime, Team};
use agent_store::SessionStore;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const BROADCAST_CAPACITY: usize = 1024;

/// Bookkeeping for one in-flight `RunStream`, so `chat.abort`/`resume` can
/// reach it by session id.
pub struct ActiveRun {
    pub cancel: CancellationToken,
}

pub struct GatewayState {
    pub auth: ResolvedAuth,
    pub team: Arc<Team>,
    pub store: Arc<dyn SessionStore>,
    pub runtime: Arc<PersistentRuntime>,
    pub workspace_root: std::path::PathBuf,
    /// Per-session fan-out: every WebSocket client that has sent `chat.send`
    /// or otherwise subscribed to a session receives its `Event`s here.
    pub broadcasts: DashMap<SessionKey, broadcast::Sender<Event>>,
    pub active_runs: DashMap<SessionKey, ActiveRun>,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn broadcast_for(&self, session: &SessionKey) -> broadcast::Sender<Event> {
        self.broadcasts
            .entry(session.clone())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .clone()
    }
}
