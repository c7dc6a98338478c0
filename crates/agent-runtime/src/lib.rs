//! The core runtime loop and orchestration layer (§4.5-§4.10): drives a
//! declarative team of agents through a model-tool dialogue to completion.

pub mod agent;
pub mod build;
pub mod dispatch;
pub mod error;
pub mod instruction;
pub mod orchestrator;
pub mod persistent;
pub mod runtime;
pub mod trim;

pub use agent::{Agent, ModelHandle, Team};
pub use build::build_team;
pub use error::{Result, RuntimeError};
pub use orchestrator::{Loop, Orchestrator, Parallel, Sequential, Single};
pub use persistent::PersistentRuntime;
pub use runtime::LocalRuntime;
