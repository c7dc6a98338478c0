//! The workflow step executor (§4.10): walks a declarative DAG of
//! `agent`/`condition`/`parallel` steps, threading per-step outputs through a
//! context block so later steps can see earlier ones' results.

use crate::error::{Result, WorkflowError};
use agent_core::config::WorkflowStepConfig;
use agent_core::{Event, Message, Session, SessionKey};
use agent_runtime::{LocalRuntime, Orchestrator, Single};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_MAX_LOOP_ITERATIONS: u32 = 100;

/// Record of one completed step's result, addressable from later
/// `$steps.<id>.output` expressions.
#[derive(Clone, Debug)]
struct StepOutput {
    agent: Option<String>,
    output: String,
}

/// Drives a workflow's steps to completion, emitting `WorkflowStepStarted`,
/// `WorkflowStepCompleted`/`Failed`, and a final `WorkflowCompleted` on the
/// returned channel.
pub struct WorkflowExecutor {
    runtime: Arc<LocalRuntime>,
    steps: Vec<WorkflowStepConfig>,
    max_loop_iterations: u32,
    /// Serializes "pick current agent + start its stream" so concurrent
    /// parallel children never race on shared executor bookkeeping (§4.10).
    step_lock: Mutex<()>,
    loop_counts: DashMap<String, u32>,
    by_id: HashMap<String, WorkflowStepConfig>,
}

impl WorkflowExecutor {
    /// Fails fast if a `condition` step's `on_true`/`on_false` targets an id
    /// that doesn't exist anywhere in the DAG (config-time typo).
    pub fn new(runtime: Arc<LocalRuntime>, steps: Vec<WorkflowStepConfig>, max_loop_iterations: u32) -> Result<Self> {
        let mut by_id = HashMap::new();
        index_steps(&steps, &mut by_id);
        for step in by_id.values() {
            if let WorkflowStepConfig::Condition { id, on_true, on_false, .. } = step {
                for target in [on_true, on_false] {
                    if !by_id.contains_key(target) {
                        return Err(WorkflowError::UnknownStepTarget { step_id: id.clone(), target: target.clone() });
                    }
                }
            }
        }
        Ok(Self {
            runtime,
            steps,
            max_loop_iterations: if max_loop_iterations == 0 { DEFAULT_MAX_LOOP_ITERATIONS } else { max_loop_iterations },
            step_lock: Mutex::new(()),
            loop_counts: DashMap::new(),
            by_id,
        })
    }

    /// Run the workflow against `prompt`, starting at the first declared
    /// top-level step. `workspace_dir` seeds each generated sub-session.
    pub fn run(
        self: Arc<Self>,
        prompt: String,
        workspace_dir: String,
        cancel: CancellationToken,
    ) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let outputs: DashMap<String, StepOutput> = DashMap::new();
            let mut current_idx = 0usize;
            let mut last_output = String::new();

            loop {
                if cancel.is_cancelled() || current_idx >= self.steps.len() {
                    break;
                }
                let step = self.steps[current_idx].clone();
                let id = step.id().to_string();

                let count = {
                    let mut entry = self.loop_counts.entry(id.clone()).or_insert(0);
                    *entry += 1;
                    *entry
                };
                if count > self.max_loop_iterations {
                    let _ = tx.send(Event::WorkflowStepFailed {
                        step_id: id.clone(),
                        error: format!("max loop iterations ({}) exceeded", self.max_loop_iterations),
                    });
                    return;
                }

                let _ = tx.send(Event::WorkflowStepStarted { step_id: id.clone() });
                match self
                    .execute_step(&step, &prompt, &workspace_dir, &outputs, cancel.clone(), &tx)
                    .await
                {
                    Ok(StepResult::Advance(output)) => {
                        last_output = output.clone();
                        let _ = tx.send(Event::WorkflowStepCompleted { step_id: id.clone(), output });
                        current_idx += 1;
                    }
                    Ok(StepResult::JumpTo(target)) => {
                        let _ = tx.send(Event::WorkflowStepCompleted { step_id: id.clone(), output: String::new() });
                        match self.top_level_index(&target) {
                            Some(idx) => current_idx = idx,
                            None => {
                                let _ = tx.send(Event::WorkflowStepFailed {
                                    step_id: id.clone(),
                                    error: format!("unknown step target: {target}"),
                                });
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Event::WorkflowStepFailed { step_id: id, error: e.to_string() });
                        return;
                    }
                }
            }

            let _ = tx.send(Event::WorkflowCompleted { output: last_output });
        });
        rx
    }

    fn top_level_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id() == id)
    }

    /// Execute one step, recursing into `parallel` children. Returns either
    /// `Advance` (proceed to the next top-level step) or `JumpTo` (a
    /// `condition` branch target).
    fn execute_step<'a>(
        &'a self,
        step: &'a WorkflowStepConfig,
        prompt: &'a str,
        workspace_dir: &'a str,
        outputs: &'a DashMap<String, StepOutput>,
        cancel: CancellationToken,
        tx: &'a mpsc::UnboundedSender<Event>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<StepResult>> + Send + 'a>> {
        Box::pin(async move {
            match step {
                WorkflowStepConfig::Agent { id, agent, retries } => {
                    let output = self.run_agent_step_with_retry(id, agent, prompt, workspace_dir, outputs, cancel, *retries).await?;
                    outputs.insert(id.clone(), StepOutput { agent: Some(agent.clone()), output: output.clone() });
                    Ok(StepResult::Advance(output))
                }
                WorkflowStepConfig::Condition { id, expr, on_true, on_false } => {
                    let cond = evaluate_condition(id, expr, outputs)?;
                    debug!(step = %id, expr = %expr, result = cond, "condition evaluated");
                    Ok(StepResult::JumpTo(if cond { on_true.clone() } else { on_false.clone() }))
                }
                WorkflowStepConfig::Parallel { id, children } => {
                    let futures = children.iter().map(|child| {
                        self.execute_step(child, prompt, workspace_dir, outputs, cancel.clone(), tx)
                    });
                    let results = futures::future::join_all(futures).await;

                    let mut composite = Vec::with_capacity(results.len());
                    for (child, result) in children.iter().zip(results) {
                        let output = match result? {
                            StepResult::Advance(output) => output,
                            StepResult::JumpTo(_) => {
                                return Err(WorkflowError::MalformedCondition {
                                    step_id: id.clone(),
                                    reason: "condition steps cannot appear directly inside parallel".to_string(),
                                })
                            }
                        };
                        outputs.insert(child.id().to_string(), StepOutput { agent: None, output: output.clone() });
                        composite.push(serde_json::json!({ "id": child.id(), "output": output }));
                    }
                    let rendered = serde_json::to_string(&Value::Array(composite))?;
                    outputs.insert(id.clone(), StepOutput { agent: None, output: rendered.clone() });
                    Ok(StepResult::Advance(rendered))
                }
            }
        })
    }

    /// Runs the step, retrying up to `retries` additional times if the
    /// agent's stream reports an `Error` event. Each attempt gets a fresh
    /// sub-session; only the final attempt's error (if all are exhausted)
    /// fails the step.
    #[allow(clippy::too_many_arguments)]
    async fn run_agent_step_with_retry(
        &self,
        step_id: &str,
        agent_name: &str,
        prompt: &str,
        workspace_dir: &str,
        outputs: &DashMap<String, StepOutput>,
        cancel: CancellationToken,
        retries: u32,
    ) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            match self.run_agent_step(step_id, agent_name, prompt, workspace_dir, outputs, cancel.clone()).await {
                Ok(output) => return Ok(output),
                Err(e) if attempt < retries => {
                    attempt += 1;
                    warn!(step = %step_id, attempt, retries, error = %e, "agent step failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_agent_step(
        &self,
        step_id: &str,
        agent_name: &str,
        prompt: &str,
        workspace_dir: &str,
        outputs: &DashMap<String, StepOutput>,
        cancel: CancellationToken,
    ) -> Result<String> {
        let _guard = self.step_lock.lock().await;

        let mut session = Session::new(SessionKey::generate(), workspace_dir.to_string());
        session.tools_approved = true;
        if let Some(context) = render_context_block(outputs) {
            session.push_message(Message::system(context));
        }
        session.push_message(Message::user(prompt.to_string()));

        let session = Arc::new(Mutex::new(session));
        let orchestrator = Single::new(self.runtime.clone(), agent_name.to_string(), session.clone());
        drop(_guard);

        let mut rx = orchestrator.run(cancel);
        let mut last_choice = String::new();
        let mut step_error = None;
        while let Some(event) = rx.recv().await {
            match event {
                Event::AgentChoice { delta, .. } => last_choice.push_str(&delta),
                Event::Error { message, .. } => {
                    warn!(step = %step_id, error = %message, "agent step reported an error");
                    step_error = Some(message);
                }
                _ => {}
            }
        }
        match step_error {
            Some(message) => Err(WorkflowError::StepFailed { step_id: step_id.to_string(), reason: message }),
            None => Ok(last_choice),
        }
    }
}

enum StepResult {
    Advance(String),
    JumpTo(String),
}

fn index_steps(steps: &[WorkflowStepConfig], by_id: &mut HashMap<String, WorkflowStepConfig>) {
    for step in steps {
        by_id.insert(step.id().to_string(), step.clone());
        if let WorkflowStepConfig::Parallel { children, .. } = step {
            index_steps(children, by_id);
        }
    }
}

/// Render every completed step's output, labelled by step ID and agent name,
/// as a system-role context block (§4.10). `None` if nothing has run yet.
fn render_context_block(outputs: &DashMap<String, StepOutput>) -> Option<String> {
    if outputs.is_empty() {
        return None;
    }
    let mut lines = vec!["Prior step outputs:".to_string()];
    for entry in outputs.iter() {
        let (id, step_output) = (entry.key(), entry.value());
        let label = step_output.agent.as_deref().unwrap_or("parallel");
        lines.push(format!("- [{id}] ({label}): {}", step_output.output));
    }
    Some(lines.join("\n"))
}

/// Restricted grammar: `$steps.<id>.output` optionally followed by a JSON
/// path (e.g. `$steps.check.output.status`). Resolves to a JSON value and
/// reports its truthiness.
fn evaluate_condition(step_id: &str, expr: &str, outputs: &DashMap<String, StepOutput>) -> Result<bool> {
    let rest = expr.strip_prefix("$steps.").ok_or_else(|| WorkflowError::MalformedCondition {
        step_id: step_id.to_string(),
        reason: "expression must start with $steps.".to_string(),
    })?;
    let mut parts = rest.splitn(3, '.');
    let target_id = parts.next().unwrap_or_default();
    let output_literal = parts.next().unwrap_or_default();
    if output_literal != "output" {
        return Err(WorkflowError::MalformedCondition {
            step_id: step_id.to_string(),
            reason: format!("expected `<id>.output`, got `{rest}`"),
        });
    }
    let json_path = parts.next();

    let Some(recorded) = outputs.get(target_id) else {
        return Err(WorkflowError::UnknownStepTarget { step_id: step_id.to_string(), target: target_id.to_string() });
    };

    let value: Value = serde_json::from_str(&recorded.output).unwrap_or_else(|_| Value::String(recorded.output.clone()));
    let resolved = match json_path {
        Some(path) => path.split('.').try_fold(value, |acc, segment| acc.get(segment).cloned()).unwrap_or(Value::Null),
        None => value,
    };
    Ok(is_truthy(&resolved))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs_with(id: &str, value: &str) -> DashMap<String, StepOutput> {
        let map = DashMap::new();
        map.insert(id.to_string(), StepOutput { agent: Some("a".to_string()), output: value.to_string() });
        map
    }

    #[test]
    fn condition_resolves_plain_string_output() {
        let outputs = outputs_with("check", "yes");
        assert!(evaluate_condition("cond1", "$steps.check.output", &outputs).unwrap());
    }

    #[test]
    fn condition_resolves_json_path() {
        let outputs = outputs_with("check", r#"{"status": true}"#);
        assert!(evaluate_condition("cond1", "$steps.check.output.status", &outputs).unwrap());
    }

    #[test]
    fn condition_rejects_malformed_expr() {
        let outputs = outputs_with("check", "yes");
        assert!(evaluate_condition("cond1", "steps.check.output", &outputs).is_err());
    }

    #[test]
    fn condition_unknown_target_is_an_error() {
        let outputs = outputs_with("check", "yes");
        assert!(evaluate_condition("cond1", "$steps.missing.output", &outputs).is_err());
    }

    #[test]
    fn context_block_labels_by_step_and_agent() {
        let outputs = outputs_with("check", "yes");
        let rendered = render_context_block(&outputs).unwrap();
        assert!(rendered.contains("[check] (a): yes"));
    }

    #[test]
    fn new_rejects_condition_targeting_unknown_step() {
        let registry = agent_tools::create_default_registry(std::env::temp_dir());
        let agent = agent_runtime::Agent {
            name: "root".to_string(),
            instruction: String::new(),
            model: agent_runtime::ModelHandle::new(
                Arc::new(agent_llm::AnthropicProvider::new("test")),
                "claude-haiku-4-5-20251001",
            ),
            toolsets: vec![Arc::new(registry)],
            sub_agents: Vec::new(),
            num_history_items: 0,
            enable_bang_commands: false,
            max_iterations: 0,
        };
        let mut team = agent_runtime::Team::new();
        team.register_agent(agent);
        let runtime = LocalRuntime::new(Arc::new(team));

        let steps = vec![WorkflowStepConfig::Condition {
            id: "cond".to_string(),
            expr: "$steps.cond.output".to_string(),
            on_true: "missing".to_string(),
            on_false: "also_missing".to_string(),
        }];
        assert!(WorkflowExecutor::new(runtime, steps, 0).is_err());
    }

    #[test]
    fn index_steps_recurses_into_parallel_children() {
        let steps = vec![WorkflowStepConfig::Parallel {
            id: "fan".to_string(),
            children: vec![
                WorkflowStepConfig::Agent { id: "a1".to_string(), agent: "root".to_string(), retries: 0 },
                WorkflowStepConfig::Agent { id: "a2".to_string(), agent: "root".to_string(), retries: 0 },
            ],
        }];
        let mut by_id = HashMap::new();
        index_steps(&steps, &mut by_id);
        assert!(by_id.contains_key("fan"));
        assert!(by_id.contains_key("a1"));
        assert!(by_id.contains_key("a2"));
    }

    /// Fails its first N calls with a stream-level `Error`, then succeeds
    /// with a fixed reply. Used to exercise the agent-step retry path
    /// without a real network call.
    struct FlakyProvider {
        fail_remaining: std::sync::atomic::AtomicU32,
        reply: &'static str,
    }

    #[async_trait::async_trait]
    impl agent_llm::ModelProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }
        fn models(&self) -> &[&str] {
            &["flaky-model"]
        }
        async fn complete_stream(
            &self,
            _request: agent_llm::LlmRequest,
            _cancel: Option<CancellationToken>,
        ) -> agent_llm::LlmResult<agent_llm::LlmStream> {
            use std::sync::atomic::Ordering;
            let remaining = self.fail_remaining.load(Ordering::SeqCst);
            let item = if remaining > 0 {
                self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
                agent_llm::StreamDelta::Error("simulated transient failure".to_string())
            } else {
                agent_llm::StreamDelta::Text(self.reply.to_string())
            };
            let done = agent_llm::StreamDelta::Done { stop_reason: Some("end_turn".to_string()), usage: None, parallel_tool_calls: false };
            Ok(Box::pin(futures::stream::iter(vec![Ok(item), Ok(done)])))
        }
    }

    fn flaky_team(fail_times: u32) -> (Arc<agent_runtime::Team>, &'static str) {
        let registry = agent_tools::create_default_registry(std::env::temp_dir());
        let provider = Arc::new(FlakyProvider { fail_remaining: std::sync::atomic::AtomicU32::new(fail_times), reply: "done" });
        let agent = agent_runtime::Agent {
            name: "root".to_string(),
            instruction: String::new(),
            model: agent_runtime::ModelHandle::new(provider, "flaky-model"),
            toolsets: vec![Arc::new(registry)],
            sub_agents: Vec::new(),
            num_history_items: 0,
            enable_bang_commands: false,
            max_iterations: 0,
        };
        let mut team = agent_runtime::Team::new();
        team.register_agent(agent);
        (Arc::new(team), "done")
    }

    #[tokio::test]
    async fn agent_step_retries_until_success() {
        let (team, reply) = flaky_team(2);
        let runtime = LocalRuntime::new(team);
        let steps = vec![WorkflowStepConfig::Agent { id: "s1".to_string(), agent: "root".to_string(), retries: 2 }];
        let executor = Arc::new(WorkflowExecutor::new(runtime, steps, 0).unwrap());

        let mut rx = executor.run("hi".to_string(), std::env::temp_dir().to_string_lossy().to_string(), CancellationToken::new());
        let mut completed = None;
        while let Some(event) = rx.recv().await {
            if let Event::WorkflowCompleted { output } = event {
                completed = Some(output);
            }
        }
        assert_eq!(completed.as_deref(), Some(reply));
    }

    #[tokio::test]
    async fn agent_step_fails_after_exhausting_retries() {
        let (team, _reply) = flaky_team(5);
        let runtime = LocalRuntime::new(team);
        let steps = vec![WorkflowStepConfig::Agent { id: "s1".to_string(), agent: "root".to_string(), retries: 1 }];
        let executor = Arc::new(WorkflowExecutor::new(runtime, steps, 0).unwrap());

        let mut rx = executor.run("hi".to_string(), std::env::temp_dir().to_string_lossy().to_string(), CancellationToken::new());
        let mut failed = false;
        while let Some(event) = rx.recv().await {
            if let Event::WorkflowStepFailed { step_id, .. } = event {
                assert_eq!(step_id, "s1");
                failed = true;
            }
        }
        assert!(failed);
    }
}
