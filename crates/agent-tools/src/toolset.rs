//! The `ToolSet` capability set (§4.3): enumerate tools, invoke by name,
//! optionally be startable/stoppable, optionally provide MCP-style prompts.
//!
//! `ToolRegistry` (registry.rs) is the default, always-non-startable
//! implementation backing the builtin tool set. A `ToolSet` wrapping an MCP
//! server, by contrast, typically also implements `Startable` (spin up the
//! subprocess/connection lazily) — see `StartableToolSet` below.

use crate::registry::{Tool, ToolResult};
use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A named, templated MCP prompt.
#[derive(Clone, Debug)]
pub struct PromptTemplate {
    pub name: String,
    pub description: String,
    pub arguments: Vec<String>,
}

/// Capability set every tool provider implements (§3 ToolSet, §4.3).
#[async_trait]
pub trait ToolSet: Send + Sync {
    fn list_tools(&self) -> Vec<Arc<dyn Tool>>;
    fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>>;

    async fn invoke(&self, name: &str, args: Value, cancel: CancellationToken) -> ToolResult {
        match self.get_tool(name) {
            Some(tool) if tool.is_enabled() => tool.execute_cancellable(args, cancel).await,
            Some(_) => ToolResult::error(format!("tool '{name}' is disabled")),
            None => ToolResult::error(format!("tool not found: {name}")),
        }
    }

    /// Named MCP prompts this set exposes, if any. Empty by default.
    fn prompts(&self) -> Vec<PromptTemplate> {
        Vec::new()
    }

    /// Render a named prompt's resolved text given template arguments.
    /// `Ok(None)` if this set doesn't provide the prompt.
    fn render_prompt(&self, _name: &str, _args: &Value) -> Option<String> {
        None
    }

    /// Hook used by [`deep_as`] to recurse through wrapper layers looking for
    /// an inner capability (e.g. a model-switcher target). The base
    /// implementation has no inner set.
    fn inner(&self) -> Option<&dyn ToolSet> {
        None
    }

    /// Enables `deep_as::<T>` to downcast through the trait object.
    fn as_any(&self) -> &dyn Any;
}

/// Recursively unwrap `ToolSet` wrappers (e.g. `StartableToolSet`) looking
/// for an implementor of `T`. Rust has no reflection-based dynamic cast
/// beyond `Any`, so this walks the `inner()` hook one layer at a time.
pub fn deep_as<T: Any>(set: &dyn ToolSet) -> Option<&T> {
    if let Some(found) = set.as_any().downcast_ref::<T>() {
        return Some(found);
    }
    set.inner().and_then(deep_as::<T>)
}

#[async_trait]
impl ToolSet for crate::registry::ToolRegistry {
    fn list_tools(&self) -> Vec<Arc<dyn Tool>> {
        self.list().into_iter().filter_map(|name| self.get(name)).collect()
    }

    fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.get(name)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
