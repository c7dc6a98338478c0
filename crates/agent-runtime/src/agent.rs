//! `Agent` and `Team` (§3): the static description of who can run and what
//! they can call, as opposed to `runtime::LocalRuntime` which drives them.

use agent_llm::ModelProvider;
use agent_tools::ToolSet;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A live, swappable model handle. `switch_model` (§4.5.1) atomically
/// replaces the inner `Arc<dyn ModelProvider>` plus the model name string;
/// every iteration boundary re-reads both under the same lock (§9).
pub struct ModelHandle {
    inner: RwLock<(Arc<dyn ModelProvider>, String)>,
}

impl ModelHandle {
    pub fn new(provider: Arc<dyn ModelProvider>, model_name: impl Into<String>) -> Self {
        Self { inner: RwLock::new((provider, model_name.into())) }
    }

    pub async fn get(&self) -> (Arc<dyn ModelProvider>, String) {
        let guard = self.inner.read().await;
        (guard.0.clone(), guard.1.clone())
    }

    pub async fn switch(&self, provider: Arc<dyn ModelProvider>, model_name: impl Into<String>) {
        let mut guard = self.inner.write().await;
        *guard = (provider, model_name.into());
    }
}

/// `{Name, Instruction, Model, Toolsets, SubAgents, NumHistoryItems,
/// EnableBangCommands}` (§3). `sub_agents` holds names, not ownership — the
/// `Team` is the single owner of every `Agent`.
pub struct Agent {
    pub name: String,
    pub instruction: String,
    pub model: ModelHandle,
    pub toolsets: Vec<Arc<dyn ToolSet>>,
    pub sub_agents: Vec<String>,
    pub num_history_items: usize,
    pub enable_bang_commands: bool,
    pub max_iterations: u32,
}

impl Agent {
    /// Find a tool by name across this agent's toolset union. First match
    /// wins if more than one toolset declares the same name.
    pub fn find_tool(&self, name: &str) -> Option<Arc<dyn agent_tools::Tool>> {
        self.toolsets.iter().find_map(|ts| ts.get_tool(name))
    }
}

/// `Name -> Agent` plus shared resources (§3). Owns every `Agent` and its
/// toolsets; runtimes hold borrowed `Arc` references, never a second owner.
pub struct Team {
    agents: HashMap<String, Arc<Agent>>,
    /// Declared model names available to `switch_model`, each mapped to the
    /// provider that serves it.
    models: HashMap<String, Arc<dyn ModelProvider>>,
}

impl Team {
    pub fn new() -> Self {
        Self { agents: HashMap::new(), models: HashMap::new() }
    }

    pub fn register_agent(&mut self, agent: Agent) {
        self.agents.insert(agent.name.clone(), Arc::new(agent));
    }

    pub fn register_model(&mut self, name: impl Into<String>, provider: Arc<dyn ModelProvider>) {
        self.models.insert(name.into(), provider);
    }

    pub fn agent(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn model(&self, name: &str) -> Option<Arc<dyn ModelProvider>> {
        self.models.get(name).cloned()
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.models.keys().map(|s| s.as_str()).collect()
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.keys().map(|s| s.as_str()).collect()
    }

    /// Close every distinct toolset across every agent in LIFO registration
    /// order, logging but not failing on individual teardown errors (§5
    /// shared-resource policy).
    pub async fn stop_toolsets(&self) {
        let mut seen = std::collections::HashSet::new();
        let mut startables: Vec<&Arc<dyn ToolSet>> = Vec::new();
        for agent in self.agents.values() {
            for ts in &agent.toolsets {
                let ptr = Arc::as_ptr(ts) as *const () as usize;
                if seen.insert(ptr) {
                    startables.push(ts);
                }
            }
        }
        for ts in startables.into_iter().rev() {
            if let Some(startable) = agent_tools::deep_as::<agent_tools::StartableToolSet>(ts.as_ref()) {
                startable.stop().await;
            }
        }
    }
}

impl Default for Team {
    fn default() -> Self {
        Self::new()
    }
}
