//! The core runtime loop (§4.5): `LocalRuntime::run_stream` drives one
//! agent's model-tool cycle to completion, emitting events on an unbounded
//! channel and suspending for approval via a one-shot `Resume` handoff.

use crate::agent::{Agent, Team};
use crate::dispatch::{self, is_parallel_safe};
use crate::instruction;
use crate::trim;
use agent_core::{Event, Item, Message, ResumeRequest, Role, Session, SessionKey, ToolCall};
use agent_llm::{to_llm_messages, LlmRequest, LlmTool, StreamDelta};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_MAX_TOKENS: u32 = 8192;
const MAX_AUTO_EXTENSIONS: u32 = 3;

fn transfer_task_tool_def() -> LlmTool {
    LlmTool {
        name: "transfer_task".to_string(),
        description: "Delegate a task to a named sub-agent and return its result.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "agent": {"type": "string"},
                "task": {"type": "string"},
                "expected_output": {"type": "string"}
            },
            "required": ["agent", "task"]
        }),
    }
}

fn switch_model_tool_def() -> LlmTool {
    LlmTool {
        name: "switch_model".to_string(),
        description: "Switch the current agent's model handle for subsequent iterations.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": { "model": {"type": "string"} },
            "required": ["model"]
        }),
    }
}

/// Drives a single agent's `RunStream`. `transfer_task` constructs a fresh
/// `LocalRuntime` sharing the same `Team` to run the nested sub-session, so
/// each nested run gets its own independent pending-approval slot.
pub struct LocalRuntime {
    team: Arc<Team>,
    pending_resume: Mutex<Option<oneshot::Sender<ResumeRequest>>>,
}

impl LocalRuntime {
    pub fn new(team: Arc<Team>) -> Arc<Self> {
        Arc::new(Self { team, pending_resume: Mutex::new(None) })
    }

    pub fn team(&self) -> &Team {
        &self.team
    }

    /// Fulfil the single outstanding approval request, if any. A second
    /// `Resume` call before a new confirmation is emitted finds no pending
    /// sender and is silently discarded (§4.5.2).
    pub async fn resume(&self, decision: ResumeRequest) {
        let mut guard = self.pending_resume.lock().await;
        if let Some(sender) = guard.take() {
            let _ = sender.send(decision);
        } else {
            debug!("resume() called with no pending approval; discarded");
        }
    }

    async fn await_resume(&self, cancel: &CancellationToken) -> Option<ResumeRequest> {
        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.pending_resume.lock().await;
            *guard = Some(tx);
        }
        tokio::select! {
            result = rx => result.ok(),
            _ = cancel.cancelled() => None,
        }
    }

    /// Entry point (§4.5): `RunStream(ctx, session) -> <-chan Event`. The
    /// session is shared via `Arc<Mutex<..>>` so a wrapping `PersistentRuntime`
    /// can read intermediate state for debounced saves.
    pub fn run_stream(
        self: Arc<Self>,
        agent_name: String,
        session: Arc<Mutex<Session>>,
        cancel: CancellationToken,
    ) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            self.drive(agent_name, session, cancel, tx).await;
        });
        rx
    }

    async fn drive(
        self: Arc<Self>,
        agent_name: String,
        session: Arc<Mutex<Session>>,
        cancel: CancellationToken,
        tx: mpsc::UnboundedSender<Event>,
    ) {
        let Some(agent) = self.team.agent(&agent_name) else {
            let session_id = session.lock().await.id.clone();
            let _ = tx.send(Event::Error {
                agent: agent_name.clone(),
                session: session_id,
                message: format!("unknown agent: {agent_name}"),
            });
            return;
        };

        let (cleaned_instruction, instr_calls) = instruction::expand(&agent.instruction);
        if !instr_calls.is_empty() {
            self.run_instruction_tool_calls(&agent, &session, &instr_calls, &cancel, &tx).await;
        }

        let mut extensions_used = 0u32;
        loop {
            if cancel.is_cancelled() {
                return;
            }

            let session_id = session.lock().await.id.clone();
            if tx.send(Event::StreamStarted { agent: agent_name.clone(), session: session_id.clone() }).is_err() {
                return;
            }

            let non_system: Vec<Message> = {
                let guard = session.lock().await;
                let mut candidate: Vec<Message> = vec![Message::system(cleaned_instruction.clone())];
                candidate.extend(guard.messages().cloned());
                trim::trim(&candidate, agent.num_history_items).into_iter().filter(|m| m.role != Role::System).collect()
            };

            let thinking = session.lock().await.thinking;
            let mut tools: Vec<LlmTool> = agent.toolsets.iter().flat_map(|ts| ts.list_tools()).map(|t| t.to_llm_tool()).collect();
            tools.push(transfer_task_tool_def());
            tools.push(switch_model_tool_def());

            let (provider, model_name) = agent.model.get().await;
            let request = LlmRequest {
                model: model_name,
                messages: to_llm_messages(&non_system).await,
                tools: Some(tools),
                max_tokens: Some(DEFAULT_MAX_TOKENS),
                temperature: None,
                system: Some(cleaned_instruction.clone()),
                thinking: Some(thinking),
            };

            let stream = match provider.complete_stream(request, Some(cancel.clone())).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = tx.send(Event::Error { agent: agent_name.clone(), session: session_id.clone(), message: e.to_string() });
                    return;
                }
            };

            let outcome = self.consume_stream(&agent_name, &session_id, stream, &cancel, &tx).await;
            let StreamOutcome { text, tool_calls, usage, parallel_tool_calls, stop_reason, errored } = match outcome {
                Some(o) => o,
                None => return,
            };
            if errored {
                return;
            }

            let assistant_message =
                Message::assistant_with_tool_calls(text, tool_calls.clone()).with_agent(agent_name.clone(), agent_name.clone());
            {
                let mut guard = session.lock().await;
                guard.push_message(assistant_message);
                if let Some(usage) = &usage {
                    guard.input_tokens += usage.input_tokens as u64;
                    guard.output_tokens += usage.output_tokens as u64;
                }
            }
            if usage.is_some() {
                let (input_tokens, output_tokens) = {
                    let guard = session.lock().await;
                    (guard.input_tokens, guard.output_tokens)
                };
                let _ = tx.send(Event::TokenUsage {
                    agent: agent_name.clone(),
                    session: session_id.clone(),
                    input_tokens,
                    output_tokens,
                    cost: 0.0,
                });
            }

            if tool_calls.is_empty() {
                let _ = tx.send(Event::StreamStopped {
                    agent: agent_name.clone(),
                    session: session_id.clone(),
                    stop_reason: stop_reason.unwrap_or_else(|| "end_turn".to_string()),
                });
                return;
            }

            let tools_approved = { session.lock().await.tools_approved };
            self.handle_tool_calls(&agent, &session, &session_id, &tool_calls, parallel_tool_calls, tools_approved, &cancel, &tx)
                .await;

            extensions_used = match self.check_iteration_cap(&agent, &session, &session_id, extensions_used, &cancel, &tx).await {
                IterationCheck::Continue(n) => n,
                IterationCheck::Stop => return,
            };
        }
    }

    async fn run_instruction_tool_calls(
        &self,
        agent: &Agent,
        session: &Arc<Mutex<Session>>,
        instr_calls: &[instruction::InstructionToolCall],
        cancel: &CancellationToken,
        tx: &mpsc::UnboundedSender<Event>,
    ) {
        let session_id = session.lock().await.id.clone();
        let calls: Vec<ToolCall> = instr_calls.iter().map(|c| c.call.clone()).collect();
        {
            let mut guard = session.lock().await;
            guard.push_message(Message::assistant_with_tool_calls("", calls.clone()).with_agent(agent.name.clone(), agent.name.clone()));
        }
        for call in &calls {
            let _ = tx.send(Event::ToolCall { agent: agent.name.clone(), session: session_id.clone(), call: call.clone() });
        }

        // §4.6: the rewritten placeholder goes through the standard dispatch
        // path, so approval still gates it unless the session is yolo-mode.
        let tools_approved = { session.lock().await.tools_approved };
        let mut results: Vec<Message> = Vec::with_capacity(calls.len());
        for call in &calls {
            let message = if tools_approved {
                dispatch::execute_one(agent, call, cancel.clone()).await
            } else {
                let _ = tx.send(Event::ToolCallConfirmation { agent: agent.name.clone(), session: session_id.clone(), call: call.clone() });
                match self.await_resume(cancel).await {
                    Some(ResumeRequest::Approve) => dispatch::execute_one(agent, call, cancel.clone()).await,
                    Some(ResumeRequest::Reject { reason }) => Message::tool_result(call.id.clone(), reason, true),
                    _ => Message::tool_result(call.id.clone(), "no approval decision received", true),
                }
            };
            results.push(message);
        }

        let mut guard = session.lock().await;
        for (call, message) in calls.iter().zip(results.into_iter()) {
            let _ = tx.send(Event::ToolCallResponse {
                agent: agent.name.clone(),
                session: session_id.clone(),
                tool_call_id: call.id.clone(),
                content: message.text.clone(),
                is_error: message.is_error.unwrap_or(false),
            });
            guard.push_message(message);
        }
    }

    async fn consume_stream(
        &self,
        agent_name: &str,
        session_id: &SessionKey,
        stream: agent_llm::LlmStream,
        cancel: &CancellationToken,
        tx: &mpsc::UnboundedSender<Event>,
    ) -> Option<StreamOutcome> {
        tokio::pin!(stream);
        let mut text = String::new();
        let mut accumulating: std::collections::HashMap<String, (String, String)> = std::collections::HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut finalized: Vec<ToolCall> = Vec::new();
        let mut usage = None;
        let mut parallel_tool_calls = false;
        let mut stop_reason = None;

        loop {
            let next = tokio::select! {
                item = stream.next() => item,
                _ = cancel.cancelled() => return None,
            };
            let Some(item) = next else { break };
            match item {
                Ok(StreamDelta::Text(delta)) => {
                    text.push_str(&delta);
                    if tx.send(Event::AgentChoice { agent: agent_name.to_string(), session: session_id.clone(), delta }).is_err() {
                        return None;
                    }
                }
                Ok(StreamDelta::Thinking(delta)) => {
                    let _ = tx.send(Event::AgentChoiceReasoning { agent: agent_name.to_string(), session: session_id.clone(), delta });
                }
                Ok(StreamDelta::ToolCallStart { id, name }) => {
                    accumulating.insert(id.clone(), (name, String::new()));
                    order.push(id.clone());
                    let _ = tx.send(Event::PartialToolCall { agent: agent_name.to_string(), session: session_id.clone(), id, partial_arguments: String::new() });
                }
                Ok(StreamDelta::ToolCallDelta { id, arguments }) => {
                    if let Some(entry) = accumulating.get_mut(&id) {
                        entry.1.push_str(&arguments);
                    }
                    let _ = tx.send(Event::PartialToolCall { agent: agent_name.to_string(), session: session_id.clone(), id, partial_arguments: arguments });
                }
                Ok(StreamDelta::ToolCallEnd { id }) => {
                    if let Some((name, arguments)) = accumulating.remove(&id) {
                        let call = ToolCall::new(id.clone(), name, arguments);
                        let _ = tx.send(Event::ToolCall { agent: agent_name.to_string(), session: session_id.clone(), call: call.clone() });
                        finalized.push(call);
                    }
                }
                Ok(StreamDelta::Done { stop_reason: sr, usage: u, parallel_tool_calls: p }) => {
                    stop_reason = sr;
                    usage = u;
                    parallel_tool_calls = p;
                }
                Ok(StreamDelta::Error(message)) => {
                    let _ = tx.send(Event::Error { agent: agent_name.to_string(), session: session_id.clone(), message });
                    return Some(StreamOutcome { text, tool_calls: finalized, usage, parallel_tool_calls, stop_reason, errored: true });
                }
                Err(e) => {
                    let _ = tx.send(Event::Error { agent: agent_name.to_string(), session: session_id.clone(), message: e.to_string() });
                    return Some(StreamOutcome { text, tool_calls: finalized, usage, parallel_tool_calls, stop_reason, errored: true });
                }
            }
        }

        // Defensive: fold any tool call whose `ToolCallEnd` never arrived
        // (provider dropped connection mid-argument-stream) into the
        // finalized set rather than silently discarding it.
        if finalized.len() < order.len() {
            for id in &order {
                if let Some((name, arguments)) = accumulating.remove(id) {
                    finalized.push(ToolCall::new(id.clone(), name, arguments));
                }
            }
        }

        Some(StreamOutcome { text, tool_calls: finalized, usage, parallel_tool_calls, stop_reason, errored: false })
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_tool_calls(
        &self,
        agent: &Agent,
        session: &Arc<Mutex<Session>>,
        session_id: &SessionKey,
        calls: &[ToolCall],
        parallel_tool_calls: bool,
        tools_approved: bool,
        cancel: &CancellationToken,
        tx: &mpsc::UnboundedSender<Event>,
    ) {
        let mut ordinary_calls: Vec<ToolCall> = Vec::new();
        let mut ordinary_positions: Vec<usize> = Vec::new();
        let mut results: Vec<Option<Message>> = vec![None; calls.len()];

        for (idx, call) in calls.iter().enumerate() {
            if call.function.name == "transfer_task" || call.function.name == "switch_model" {
                let approved = if tools_approved {
                    true
                } else {
                    let _ = tx.send(Event::ToolCallConfirmation { agent: agent.name.clone(), session: session_id.clone(), call: call.clone() });
                    matches!(self.await_resume(cancel).await, Some(ResumeRequest::Approve))
                };
                let message = if !approved {
                    Message::tool_result(call.id.clone(), "rejected by user", true)
                } else if call.function.name == "transfer_task" {
                    self.run_transfer_task(agent, session, call, cancel).await
                } else {
                    self.run_switch_model(agent, call).await
                };
                let _ = tx.send(Event::ToolCallResponse {
                    agent: agent.name.clone(),
                    session: session_id.clone(),
                    tool_call_id: call.id.clone(),
                    content: message.text.clone(),
                    is_error: message.is_error.unwrap_or(false),
                });
                results[idx] = Some(message);
                continue;
            }

            if tools_approved {
                ordinary_calls.push(call.clone());
                ordinary_positions.push(idx);
                continue;
            }

            let _ = tx.send(Event::ToolCallConfirmation { agent: agent.name.clone(), session: session_id.clone(), call: call.clone() });
            let decision = self.await_resume(cancel).await;
            let message = match decision {
                Some(ResumeRequest::Approve) => dispatch::execute_one(agent, call, cancel.clone()).await,
                Some(ResumeRequest::Reject { reason }) => Message::tool_result(call.id.clone(), reason, true),
                _ => Message::tool_result(call.id.clone(), "no approval decision received", true),
            };
            let _ = tx.send(Event::ToolCallResponse {
                agent: agent.name.clone(),
                session: session_id.clone(),
                tool_call_id: call.id.clone(),
                content: message.text.clone(),
                is_error: message.is_error.unwrap_or(false),
            });
            results[idx] = Some(message);
        }

        if !ordinary_calls.is_empty() {
            let batch_results = dispatch::dispatch_batch(agent, &ordinary_calls, parallel_tool_calls, cancel.clone()).await;
            for (pos, (call, message)) in ordinary_positions.iter().zip(ordinary_calls.iter().zip(batch_results.into_iter())) {
                let _ = tx.send(Event::ToolCallResponse {
                    agent: agent.name.clone(),
                    session: session_id.clone(),
                    tool_call_id: call.id.clone(),
                    content: message.text.clone(),
                    is_error: message.is_error.unwrap_or(false),
                });
                results[*pos] = Some(message);
            }
        }

        let mut guard = session.lock().await;
        for message in results.into_iter().flatten() {
            guard.push_message(message);
        }
    }

    async fn run_transfer_task(&self, agent: &Agent, parent_session: &Arc<Mutex<Session>>, call: &ToolCall, cancel: &CancellationToken) -> Message {
        #[derive(serde::Deserialize)]
        struct Args {
            agent: String,
            task: String,
            #[serde(default)]
            #[allow(dead_code)]
            expected_output: String,
        }
        let args: Args = match serde_json::from_str(&call.function.arguments) {
            Ok(a) => a,
            Err(e) => return Message::tool_result(call.id.clone(), format!("bad transfer_task arguments: {e}"), true),
        };
        if !agent.sub_agents.iter().any(|s| s == &args.agent) {
            return Message::tool_result(call.id.clone(), format!("{} is not a declared sub-agent of {}", args.agent, agent.name), true);
        }
        if self.team.agent(&args.agent).is_none() {
            return Message::tool_result(call.id.clone(), format!("unknown agent: {}", args.agent), true);
        }

        let mut sub_session = {
            let parent = parent_session.lock().await;
            let mut s = Session::child(&parent, SessionKey::generate());
            s.push_message(Message::user(args.task));
            s
        };
        sub_session.title = format!("transfer:{}", args.agent);

        let sub_session_shared = Arc::new(Mutex::new(sub_session));
        let sub_runtime = LocalRuntime::new(self.team.clone());
        let mut rx = sub_runtime.run_stream(args.agent.clone(), sub_session_shared.clone(), cancel.child_token());
        while rx.recv().await.is_some() {}

        let finished = match Arc::try_unwrap(sub_session_shared) {
            Ok(mutex) => mutex.into_inner(),
            Err(arc) => arc.lock().await.clone(),
        };
        let result_text = finished
            .messages()
            .filter(|m| m.role == Role::Assistant)
            .last()
            .map(|m| m.text.clone())
            .unwrap_or_default();

        {
            let mut parent = parent_session.lock().await;
            parent.items.push(Item::SubSession(Box::new(finished)));
        }

        Message::tool_result(call.id.clone(), result_text, false)
    }

    async fn run_switch_model(&self, agent: &Agent, call: &ToolCall) -> Message {
        #[derive(serde::Deserialize)]
        struct Args {
            model: String,
        }
        let args: Args = match serde_json::from_str(&call.function.arguments) {
            Ok(a) => a,
            Err(e) => return Message::tool_result(call.id.clone(), format!("bad switch_model arguments: {e}"), true),
        };
        let Some(provider) = self.team.model(&args.model) else {
            return Message::tool_result(call.id.clone(), format!("unknown model: {}", args.model), true);
        };
        agent.model.switch(provider, args.model.clone()).await;
        info!(model = %args.model, agent = %agent.name, "switched model");
        Message::tool_result(call.id.clone(), format!("switched to {}", args.model), false)
    }

    async fn check_iteration_cap(
        &self,
        agent: &Agent,
        session: &Arc<Mutex<Session>>,
        session_id: &SessionKey,
        extensions_used: u32,
        cancel: &CancellationToken,
        tx: &mpsc::UnboundedSender<Event>,
    ) -> IterationCheck {
        let (iterations, cap, tools_approved) = {
            let guard = session.lock().await;
            let cap = if guard.max_iterations > 0 { guard.max_iterations } else { agent.max_iterations };
            let count = guard.messages().filter(|m| m.role == Role::Assistant).count() as u32;
            (count, cap, guard.tools_approved)
        };

        if cap == 0 || iterations < cap {
            return IterationCheck::Continue(extensions_used);
        }

        let _ = tx.send(Event::MaxIterationsReached { agent: agent.name.clone(), session: session_id.clone(), iterations });

        if extensions_used >= MAX_AUTO_EXTENSIONS {
            warn!(agent = %agent.name, "auto-extension safety cap reached, stopping");
            let _ = tx.send(Event::StreamStopped { agent: agent.name.clone(), session: session_id.clone(), stop_reason: "max_iterations_exhausted".to_string() });
            return IterationCheck::Stop;
        }

        let decision = if tools_approved { Some(ResumeRequest::Extend) } else { self.await_resume(cancel).await };

        match decision {
            Some(ResumeRequest::Extend) => IterationCheck::Continue(extensions_used + 1),
            _ => {
                let _ = tx.send(Event::StreamStopped { agent: agent.name.clone(), session: session_id.clone(), stop_reason: "max_iterations_stopped".to_string() });
                IterationCheck::Stop
            }
        }
    }
}

struct StreamOutcome {
    text: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<agent_llm::Usage>,
    parallel_tool_calls: bool,
    stop_reason: Option<String>,
    errored: bool,
}

enum IterationCheck {
    Continue(u32),
    Stop,
}
