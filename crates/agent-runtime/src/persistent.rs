//! `PersistentRuntime` (§4.9): wraps a `LocalRuntime` with a debounced
//! autosave to a `SessionStore`, and skips saving entirely for sub-sessions
//! created by `transfer_task` (§4.5.1) so a delegated child never clobbers
//! its own entry under the parent's store key.

use crate::orchestrator::{Orchestrator, Single};
use crate::runtime::LocalRuntime;
use agent_core::{Event, Session, SessionKey};
use agent_store::SessionStore;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Per-session coalescing state: a single in-flight timer flushes the latest
/// session snapshot once it fires, absorbing any events that arrived while
/// it was pending.
struct DebounceState {
    timer_armed: AtomicBool,
}

/// Wraps a [`LocalRuntime`], persisting to a [`SessionStore`] after a burst
/// of mutating events settles rather than on every single one (§4.9,
/// Testable Property #7: N triggers inside one debounce window collapse to
/// exactly one write).
pub struct PersistentRuntime {
    inner: Arc<LocalRuntime>,
    store: Arc<dyn SessionStore>,
    debounce: Duration,
    states: DashMap<SessionKey, Arc<DebounceState>>,
}

impl PersistentRuntime {
    pub fn new(inner: Arc<LocalRuntime>, store: Arc<dyn SessionStore>) -> Arc<Self> {
        Self::with_debounce(inner, store, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(inner: Arc<LocalRuntime>, store: Arc<dyn SessionStore>, debounce: Duration) -> Arc<Self> {
        Arc::new(Self { inner, store, debounce, states: DashMap::new() })
    }

    /// Passthrough to the wrapped runtime's single pending-approval slot, so
    /// callers (e.g. the gateway's `resume` RPC) don't need to hold onto the
    /// inner `LocalRuntime` separately.
    pub async fn resume(&self, decision: agent_core::ResumeRequest) {
        self.inner.resume(decision).await;
    }

    /// Events that mutate session state worth persisting. Streaming deltas
    /// (`AgentChoice`, `PartialToolCall`, ...) are deliberately excluded —
    /// they don't change what `Session` serializes to.
    fn is_dirtying(event: &Event) -> bool {
        matches!(
            event,
            Event::ToolCallResponse { .. }
                | Event::TokenUsage { .. }
                | Event::SessionTitle { .. }
                | Event::SessionSummary { .. }
                | Event::SessionCompaction { .. }
                | Event::StreamStopped { .. }
                | Event::MaxIterationsReached { .. }
        )
    }

    async fn persist_now(store: &Arc<dyn SessionStore>, session: &Arc<Mutex<Session>>) {
        let snapshot = session.lock().await.clone();
        let id = snapshot.id.clone();
        match store.update(snapshot.clone()).await {
            Ok(()) => debug!(session = %id, "autosaved session"),
            Err(agent_store::Error::NotFound(_)) => {
                if let Err(e) = store.add(snapshot).await {
                    warn!(session = %id, error = %e, "failed to create session on autosave");
                }
            }
            Err(e) => warn!(session = %id, error = %e, "failed to autosave session"),
        }
    }

    fn schedule_flush(self: &Arc<Self>, state: Arc<DebounceState>, session: Arc<Mutex<Session>>) {
        if state.timer_armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.debounce).await;
            state.timer_armed.store(false, Ordering::SeqCst);
            Self::persist_now(&this.store, &session).await;
        });
    }

    /// Drives `agent_name` against `session`, forwarding every event
    /// untouched while coalescing persistence writes in the background.
    /// Sub-sessions (`session.parent_id.is_some()`) are never autosaved here
    /// — their content is captured inline in the parent's `SubSession` item
    /// by the runtime itself (§4.5.1).
    pub fn run_stream(
        self: Arc<Self>,
        agent_name: String,
        session: Arc<Mutex<Session>>,
        cancel: CancellationToken,
    ) -> mpsc::UnboundedReceiver<Event> {
        let is_sub_session = {
            // best-effort, non-blocking snapshot check; the lock is held only
            // for the duration of this read
            let session = session.clone();
            futures_lite_check(session)
        };

        let orchestrator = Single::new(self.inner.clone(), agent_name, session.clone());
        let mut upstream = orchestrator.run(cancel.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let this = self.clone();
        tokio::spawn(async move {
            let key = session.lock().await.id.clone();
            let state = this
                .states
                .entry(key.clone())
                .or_insert_with(|| Arc::new(DebounceState { timer_armed: AtomicBool::new(false) }))
                .clone();

            let mut dirtied_since_flush = false;
            while let Some(event) = upstream.recv().await {
                if !is_sub_session && Self::is_dirtying(&event) {
                    dirtied_since_flush = true;
                    this.schedule_flush(state.clone(), session.clone());
                }
                if tx.send(event).is_err() {
                    return;
                }
            }

            // Terminal flush: guarantee the final state lands even if the
            // debounce window hadn't elapsed by the time the stream ended.
            if !is_sub_session && dirtied_since_flush {
                Self::persist_now(&this.store, &session).await;
            }
            this.states.remove(&key);
        });
        rx
    }
}

/// `parent_id` is a plain field read, not an async operation, but `session`
/// is behind a `tokio::sync::Mutex` so acquiring it still goes through the
/// async lock API. Isolated into its own helper to keep `run_stream` linear.
fn futures_lite_check(session: Arc<Mutex<Session>>) -> bool {
    session
        .try_lock()
        .map(|guard| guard.parent_id.is_some())
        .unwrap_or(false)
}
