//! `agent-workflow::WorkflowError` — the crate-local error enum for the
//! step executor (§7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkflowError>;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("step {0}: no workflow configured")]
    NoWorkflow(String),

    #[error("step {step_id} exceeded max loop iterations ({max})")]
    MaxLoopIterations { step_id: String, max: u32 },

    #[error("step {step_id} references unknown step id {target}")]
    UnknownStepTarget { step_id: String, target: String },

    #[error("malformed condition expression in step {step_id}: {reason}")]
    MalformedCondition { step_id: String, reason: String },

    #[error("step {step_id} failed: {reason}")]
    StepFailed { step_id: String, reason: String },

    #[error(transparent)]
    Core(#[from] agent_core::Error),

    #[error(transparent)]
    Runtime(#[from] agent_runtime::RuntimeError),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}
