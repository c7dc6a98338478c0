//! The runtime event bus: a closed set of tagged events emitted on a single
//! channel per `RunStream` call (§4.1).

use crate::types::{SessionKey, ToolCall};
use serde::Serialize;

/// One event on the `RunStream` channel. Every variant carries the agent that
/// produced it (empty string for user/system-originated events).
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    UserMessage { agent: String, session: SessionKey, text: String },
    StreamStarted { agent: String, session: SessionKey },
    AgentChoice { agent: String, session: SessionKey, delta: String },
    AgentChoiceReasoning { agent: String, session: SessionKey, delta: String },
    PartialToolCall { agent: String, session: SessionKey, id: String, partial_arguments: String },
    ToolCall { agent: String, session: SessionKey, call: ToolCall },
    ToolCallConfirmation { agent: String, session: SessionKey, call: ToolCall },
    ToolCallResponse { agent: String, session: SessionKey, tool_call_id: String, content: String, is_error: bool },
    ShellOutput { agent: String, session: SessionKey, chunk: String },
    TokenUsage { agent: String, session: SessionKey, input_tokens: u64, output_tokens: u64, cost: f64 },
    MaxIterationsReached { agent: String, session: SessionKey, iterations: u32 },
    ElicitationRequest { agent: String, session: SessionKey, tool_call_id: String, prompt: String },
    Error { agent: String, session: SessionKey, message: String },
    StreamStopped { agent: String, session: SessionKey, stop_reason: String },
    SessionTitle { session: SessionKey, title: String },
    SessionSummary { session: SessionKey, summary: String },
    SessionCompaction { session: SessionKey, dropped_items: usize },
    WorkflowStepStarted { step_id: String },
    WorkflowStepCompleted { step_id: String, output: String },
    WorkflowStepFailed { step_id: String, error: String },
    WorkflowCompleted { output: String },
}

impl Event {
    pub fn agent_name(&self) -> &str {
        match self {
            Event::UserMessage { agent, .. }
            | Event::StreamStarted { agent, .. }
            | Event::AgentChoice { agent, .. }
            | Event::AgentChoiceReasoning { agent, .. }
            | Event::PartialToolCall { agent, .. }
            | Event::ToolCall { agent, .. }
            | Event::ToolCallConfirmation { agent, .. }
            | Event::ToolCallResponse { agent, .. }
            | Event::ShellOutput { agent, .. }
            | Event::TokenUsage { agent, .. }
            | Event::MaxIterationsReached { agent, .. }
            | Event::ElicitationRequest { agent, .. }
            | Event::Error { agent, .. }
            | Event::StreamStopped { agent, .. } => agent,
            _ => "",
        }
    }
}

/// A one-shot decision handed back into a suspended `RunStream` via `resume()`.
#[derive(Clone, Debug)]
pub enum ResumeRequest {
    Approve,
    Reject { reason: String },
    Extend,
    Stop,
    Elicitation { data: serde_json::Value },
}
