//! `StartableToolSet` (§4.3): a lazy, single-flight `Start`/`Stop` decorator
//! around a raw `ToolSet`. Concurrent callers block on one mutex; a failed
//! start leaves `started = false` so the next caller retries; `Start` is a
//! no-op if the wrapped set doesn't implement `Startable`.

use crate::registry::Tool;
use crate::toolset::ToolSet;
use async_trait::async_trait;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("start failed: {0}")]
    Failed(String),
}

/// A toolset with a lifecycle (e.g. an MCP server subprocess/connection).
#[async_trait]
pub trait Startable: Send + Sync {
    async fn start(&self) -> Result<(), StartError>;
    async fn stop(&self);
}

/// Wraps any `ToolSet`, adding lazy single-flight start/stop. If the inner
/// set also implements `Startable`, `start()`/`stop()` forward to it;
/// otherwise they're no-ops.
pub struct StartableToolSet {
    inner: Arc<dyn ToolSet>,
    startable: Option<Arc<dyn Startable>>,
    start_lock: Mutex<()>,
    started: AtomicBool,
}

impl StartableToolSet {
    pub fn new(inner: Arc<dyn ToolSet>) -> Self {
        Self { inner, startable: None, start_lock: Mutex::new(()), started: AtomicBool::new(false) }
    }

    pub fn with_lifecycle(inner: Arc<dyn ToolSet>, startable: Arc<dyn Startable>) -> Self {
        Self { inner, startable: Some(startable), start_lock: Mutex::new(()), started: AtomicBool::new(false) }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Lazy single-flight start: concurrent callers serialize on
    /// `start_lock`; once one succeeds, later callers observe `started` and
    /// return immediately without re-entering the wrapped `Startable`.
    pub async fn start(&self) -> Result<(), StartError> {
        if self.started.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.start_lock.lock().await;
        if self.started.load(Ordering::Acquire) {
            return Ok(());
        }
        let Some(startable) = &self.startable else {
            self.started.store(true, Ordering::Release);
            return Ok(());
        };
        match startable.start().await {
            Ok(()) => {
                debug!("toolset started");
                self.started.store(true, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "toolset start failed, next caller will retry");
                Err(e)
            }
        }
    }

    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(startable) = &self.startable {
            startable.stop().await;
        }
    }
}

#[async_trait]
impl ToolSet for StartableToolSet {
    fn list_tools(&self) -> Vec<Arc<dyn Tool>> {
        self.inner.list_tools()
    }

    fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.inner.get_tool(name)
    }

    fn prompts(&self) -> Vec<crate::toolset::PromptTemplate> {
        self.inner.prompts()
    }

    fn render_prompt(&self, name: &str, args: &serde_json::Value) -> Option<String> {
        self.inner.render_prompt(name, args)
    }

    fn inner(&self) -> Option<&dyn ToolSet> {
        Some(self.inner.as_ref())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolRegistry;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct SleepyBackend {
        start_calls: AtomicUsize,
        fail_first: AtomicBool,
    }

    #[async_trait]
    impl Startable for SleepyBackend {
        async fn start(&self) -> Result<(), StartError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_first.swap(false, Ordering::SeqCst) {
                return Err(StartError::Failed("boom".into()));
            }
            Ok(())
        }

        async fn stop(&self) {}
    }

    #[tokio::test]
    async fn twenty_concurrent_starts_invoke_backend_once() {
        let backend = Arc::new(SleepyBackend { start_calls: AtomicUsize::new(0), fail_first: AtomicBool::new(false) });
        let set = Arc::new(StartableToolSet::with_lifecycle(
            Arc::new(ToolRegistry::new()),
            backend.clone(),
        ));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let set = set.clone();
            handles.push(tokio::spawn(async move { set.start().await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(backend.start_calls.load(Ordering::SeqCst), 1);
        assert!(set.is_started());
    }

    #[tokio::test]
    async fn failed_start_allows_retry() {
        let backend = Arc::new(SleepyBackend { start_calls: AtomicUsize::new(0), fail_first: AtomicBool::new(true) });
        let set = StartableToolSet::with_lifecycle(Arc::new(ToolRegistry::new()), backend.clone());

        assert!(set.start().await.is_err());
        assert!(!set.is_started());
        assert!(set.start().await.is_ok());
        assert!(set.is_started());
        assert_eq!(backend.start_calls.load(Ordering::SeqCst), 2);
    }
}
