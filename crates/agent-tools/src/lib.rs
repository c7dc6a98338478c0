//! Builtin tool implementations and the `ToolSet` capability layer (§4.3).
//!
//! Each tool is a self-contained file in `src/tools/`. To add a tool: create
//! the file, implement `Tool`, register it in `create_default_registry()`.

pub mod error;
pub mod registry;
pub mod startable;
pub mod tools;
pub mod toolset;

pub use error::{Result, ToolError};
pub use registry::{Tool, ToolRegistry, ToolResult};
pub use startable::{StartError, Startable, StartableToolSet};
pub use toolset::{deep_as, PromptTemplate, ToolSet};

use std::path::Path;

/// Create the default tool registry with all builtin tools (§4.3.1).
pub fn create_default_registry(workspace_root: impl AsRef<Path>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let root = workspace_root.as_ref();

    registry.register(tools::read::ReadTool::new(root));
    registry.register(tools::glob::GlobTool::new(root));
    registry.register(tools::grep::GrepTool::new(root));
    registry.register(tools::write::WriteTool::new(root));
    registry.register(tools::edit::EditTool::new(root));
    registry.register(tools::bash::BashTool::new(root));

    registry
}

/// Create a policy-scoped tool registry containing only `allowed_tools`.
/// If a tool isn't registered, the model never sees it and can't call it.
/// An unrecognized tool name is a config error, not a silent omission.
pub fn create_policy_registry(workspace_root: impl AsRef<Path>, allowed_tools: &[&str]) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    let root = workspace_root.as_ref();

    for name in allowed_tools {
        match *name {
            "read" => registry.register(tools::read::ReadTool::new(root)),
            "glob" => registry.register(tools::glob::GlobTool::new(root)),
            "grep" => registry.register(tools::grep::GrepTool::new(root)),
            "write" => registry.register(tools::write::WriteTool::new(root)),
            "edit" => registry.register(tools::edit::EditTool::new(root)),
            "bash" => registry.register(tools::bash::BashTool::new(root)),
            other => return Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    Ok(registry)
}
