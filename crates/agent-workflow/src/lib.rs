//! The YAML-driven workflow executor (§4.10): drives a DAG of
//! agent/condition/parallel steps to completion over a shared `Team`.

pub mod error;
pub mod executor;

pub use error::{Result, WorkflowError};
pub use executor::WorkflowExecutor;
