//! Orchestrators (§4.8): composition over one or more runtime instances, all
//! exposing the same `Orchestrator::run(ctx) -> <-chan Event` contract so a
//! `Sequential` can nest a `Parallel` can nest a `Loop`, arbitrarily.

use crate::runtime::LocalRuntime;
use agent_core::{Event, Session};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Something that drives one or more runtimes and produces a single ordered
/// event stream. Implemented by `Single`, `Sequential`, `Parallel`, `Loop`.
pub trait Orchestrator: Send + Sync {
    fn run(self: Arc<Self>, cancel: CancellationToken) -> mpsc::UnboundedReceiver<Event>;
}

/// Wraps one runtime; pass-through (§4.8).
pub struct Single {
    runtime: Arc<LocalRuntime>,
    agent_name: String,
    session: Arc<Mutex<Session>>,
}

impl Single {
    pub fn new(runtime: Arc<LocalRuntime>, agent_name: impl Into<String>, session: Arc<Mutex<Session>>) -> Arc<Self> {
        Arc::new(Self { runtime, agent_name: agent_name.into(), session })
    }
}

impl Orchestrator for Single {
    fn run(self: Arc<Self>, cancel: CancellationToken) -> mpsc::UnboundedReceiver<Event> {
        self.runtime.clone().run_stream(self.agent_name.clone(), self.session.clone(), cancel)
    }
}

/// Runs a fixed list of orchestrators back-to-back, draining each event
/// channel in full before starting the next. Events are emitted in runtime
/// order (§4.8).
pub struct Sequential {
    stages: Vec<Arc<dyn Orchestrator>>,
}

impl Sequential {
    pub fn new(stages: Vec<Arc<dyn Orchestrator>>) -> Arc<Self> {
        Arc::new(Self { stages })
    }
}

impl Orchestrator for Sequential {
    fn run(self: Arc<Self>, cancel: CancellationToken) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for stage in &self.stages {
                if cancel.is_cancelled() {
                    break;
                }
                let mut stage_rx = stage.clone().run(cancel.clone());
                while let Some(event) = stage_rx.recv().await {
                    if tx.send(event).is_err() {
                        return;
                    }
                }
            }
        });
        rx
    }
}

/// Launches every stage concurrently, then drains their receivers
/// runtime-by-runtime in declared order (§4.8, §8.8): each stage is already
/// running in the background by the time `run()` returns its receiver, so
/// draining R1 to completion before starting to drain R2 costs no wall-clock
/// — it only determines the order events land on the combined channel.
pub struct Parallel {
    stages: Vec<Arc<dyn Orchestrator>>,
}

impl Parallel {
    pub fn new(stages: Vec<Arc<dyn Orchestrator>>) -> Arc<Self> {
        Arc::new(Self { stages })
    }
}

impl Orchestrator for Parallel {
    fn run(self: Arc<Self>, cancel: CancellationToken) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let receivers: Vec<mpsc::UnboundedReceiver<Event>> =
                self.stages.iter().map(|stage| stage.clone().run(cancel.clone())).collect();
            for mut stage_rx in receivers {
                while let Some(event) = stage_rx.recv().await {
                    if tx.send(event).is_err() {
                        return;
                    }
                }
            }
        });
        rx
    }
}

/// Repeatedly runs a freshly-built body orchestrator until the context is
/// cancelled, `max_iterations` is reached (0 = unbounded), or the supplied
/// exit condition returns true over the just-completed iteration's event
/// trace (§4.8).
pub struct Loop {
    body_factory: Box<dyn Fn() -> Arc<dyn Orchestrator> + Send + Sync>,
    max_iterations: u32,
    exit_condition: Option<Box<dyn Fn(&[Event]) -> bool + Send + Sync>>,
}

impl Loop {
    /// Returns a bare `Loop`, not yet wrapped in `Arc`, so `with_exit_condition`
    /// can still consume it by value. Callers compose with `Arc::new(..)`.
    pub fn new(body_factory: impl Fn() -> Arc<dyn Orchestrator> + Send + Sync + 'static, max_iterations: u32) -> Self {
        Self { body_factory: Box::new(body_factory), max_iterations, exit_condition: None }
    }

    pub fn with_exit_condition(mut self, exit_condition: impl Fn(&[Event]) -> bool + Send + Sync + 'static) -> Self {
        self.exit_condition = Some(Box::new(exit_condition));
        self
    }
}

impl Orchestrator for Loop {
    fn run(self: Arc<Self>, cancel: CancellationToken) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut iterations = 0u32;
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                if self.max_iterations > 0 && iterations >= self.max_iterations {
                    return;
                }

                let body = (self.body_factory)();
                let mut body_rx = body.run(cancel.clone());
                let mut trace = Vec::new();
                while let Some(event) = body_rx.recv().await {
                    trace.push(event.clone());
                    if tx.send(event).is_err() {
                        return;
                    }
                }

                iterations += 1;
                if let Some(exit) = &self.exit_condition {
                    if exit(&trace) {
                        return;
                    }
                }
            }
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A stub orchestrator that emits a fixed set of events tagged with a
    /// runtime name, used to exercise ordering without a live model.
    struct Stub {
        name: String,
        texts: Vec<&'static str>,
    }

    impl Orchestrator for Stub {
        fn run(self: Arc<Self>, _cancel: CancellationToken) -> mpsc::UnboundedReceiver<Event> {
            let (tx, rx) = mpsc::unbounded_channel();
            let name = self.name.clone();
            let texts = self.texts.clone();
            tokio::spawn(async move {
                for t in texts {
                    let _ = tx.send(Event::AgentChoice {
                        agent: name.clone(),
                        session: agent_core::SessionKey::new("s"),
                        delta: t.to_string(),
                    });
                }
            });
            rx
        }
    }

    #[tokio::test]
    async fn sequential_emits_in_declared_order() {
        let r1 = Arc::new(Stub { name: "r1".into(), texts: vec!["a", "b"] });
        let r2 = Arc::new(Stub { name: "r2".into(), texts: vec!["c"] });
        let seq = Sequential::new(vec![r1, r2]);
        let mut rx = seq.run(CancellationToken::new());

        let mut agents = Vec::new();
        while let Some(e) = rx.recv().await {
            agents.push(e.agent_name().to_string());
        }
        assert_eq!(agents, vec!["r1", "r1", "r2"]);
    }

    #[tokio::test]
    async fn parallel_emits_contiguous_per_runtime() {
        let r1 = Arc::new(Stub { name: "r1".into(), texts: vec!["a", "b", "c"] });
        let r2 = Arc::new(Stub { name: "r2".into(), texts: vec!["a", "b", "c"] });
        let r3 = Arc::new(Stub { name: "r3".into(), texts: vec!["a", "b", "c"] });
        let par = Parallel::new(vec![r1, r2, r3]);
        let mut rx = par.run(CancellationToken::new());

        let mut agents = Vec::new();
        while let Some(e) = rx.recv().await {
            agents.push(e.agent_name().to_string());
        }
        assert_eq!(
            agents,
            vec!["r1", "r1", "r1", "r2", "r2", "r2", "r3", "r3", "r3"],
            "each runtime's events must appear contiguously and in declared order"
        );
    }

    #[tokio::test]
    async fn loop_stops_at_max_iterations() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_factory = calls.clone();
        let body_factory = move || -> Arc<dyn Orchestrator> {
            calls_for_factory.fetch_add(1, Ordering::SeqCst);
            Arc::new(Stub { name: "body".into(), texts: vec!["x"] })
        };
        let looper = Arc::new(Loop::new(body_factory, 3));
        let mut rx = looper.run(CancellationToken::new());
        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn loop_stops_on_exit_condition() {
        let body_factory = || -> Arc<dyn Orchestrator> { Arc::new(Stub { name: "body".into(), texts: vec!["done"] }) };
        let looper = Loop::new(body_factory, 100).with_exit_condition(|trace| {
            trace.iter().any(|e| matches!(e, Event::AgentChoice { delta, .. } if delta == "done"))
        });
        let mut rx = Arc::new(looper).run(CancellationToken::new());
        let mut count = 0;
        while rx.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }
}
