//! Agent team configuration (YAML) — the only format the core consumes from
//! the outside world (§6). Migration from older schema versions happens in
//! whatever loads this from disk, upstream of the core — out of scope here,
//! so `version` is parsed and validated but not migrated.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentTeamConfig {
    pub version: String,
    pub agents: HashMap<String, AgentConfigEntry>,
    #[serde(default)]
    pub models: HashMap<String, ModelConfigEntry>,
    #[serde(default)]
    pub workflow: Option<WorkflowConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfigEntry {
    /// Either a key into `models`, or a literal `provider/name` string.
    pub model: String,
    pub instruction: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub toolsets: Vec<String>,
    #[serde(default)]
    pub sub_agents: Vec<String>,
    #[serde(default)]
    pub num_history_items: usize,
    #[serde(default)]
    pub enable_bang_commands: bool,
    #[serde(default)]
    pub commands: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfigEntry {
    pub provider: String,
    pub name: String,
}

/// Either a flat list of steps, or `{steps, max_loop_iterations}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkflowConfig {
    Steps(Vec<WorkflowStepConfig>),
    Full { steps: Vec<WorkflowStepConfig>, #[serde(default = "default_max_loop_iterations")] max_loop_iterations: u32 },
}

impl WorkflowConfig {
    pub fn steps(&self) -> &[WorkflowStepConfig] {
        match self {
            WorkflowConfig::Steps(s) => s,
            WorkflowConfig::Full { steps, .. } => steps,
        }
    }

    pub fn max_loop_iterations(&self) -> u32 {
        match self {
            WorkflowConfig::Steps(_) => default_max_loop_iterations(),
            WorkflowConfig::Full { max_loop_iterations, .. } => *max_loop_iterations,
        }
    }
}

fn default_max_loop_iterations() -> u32 {
    100
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowStepConfig {
    Agent {
        id: String,
        agent: String,
        /// Re-run the step this many additional times if the agent run
        /// reports an `Error` event, before failing the step. Default 0
        /// (no retry), matching the component table's "retry" feature.
        #[serde(default)]
        retries: u32,
    },
    Condition { id: String, expr: String, on_true: String, on_false: String },
    Parallel { id: String, children: Vec<WorkflowStepConfig> },
}

impl WorkflowStepConfig {
    pub fn id(&self) -> &str {
        match self {
            WorkflowStepConfig::Agent { id, .. }
            | WorkflowStepConfig::Condition { id, .. }
            | WorkflowStepConfig::Parallel { id, .. } => id,
        }
    }
}

impl AgentTeamConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Fatal-at-load checks (§7 Config/validation): unknown model refs,
    /// unknown sub-agent refs, malformed workflow step targets.
    pub fn validate(&self) -> Result<()> {
        if self.agents.is_empty() {
            return Err(Error::Config("at least one agent is required".to_string()));
        }
        for (name, agent) in &self.agents {
            if !self.models.contains_key(&agent.model) && !agent.model.contains('/') {
                return Err(Error::UnknownModel(agent.model.clone()));
            }
            for sub in &agent.sub_agents {
                if !self.agents.contains_key(sub) {
                    return Err(Error::UnknownAgent(format!("{name} references unknown sub-agent {sub}")));
                }
            }
        }
        if let Some(workflow) = &self.workflow {
            self.validate_workflow_steps(workflow.steps())?;
        }
        Ok(())
    }

    fn validate_workflow_steps(&self, steps: &[WorkflowStepConfig]) -> Result<()> {
        for step in steps {
            match step {
                WorkflowStepConfig::Agent { id, agent, .. } => {
                    if !self.agents.contains_key(agent) {
                        return Err(Error::MalformedWorkflowStep {
                            step_id: id.clone(),
                            reason: format!("unknown agent {agent}"),
                        });
                    }
                }
                WorkflowStepConfig::Condition { id, expr, .. } => {
                    if !expr.starts_with("$steps.") {
                        return Err(Error::MalformedWorkflowStep {
                            step_id: id.clone(),
                            reason: "condition expr must start with $steps.".to_string(),
                        });
                    }
                }
                WorkflowStepConfig::Parallel { children, .. } => {
                    self.validate_workflow_steps(children)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
version: "2"
agents:
  root:
    model: "anthropic/claude-haiku-4-5"
    instruction: "you are root"
    sub_agents: ["worker"]
  worker:
    model: "anthropic/claude-haiku-4-5"
    instruction: "you are worker"
"#;

    #[test]
    fn parses_and_validates_minimal_config() {
        let config = AgentTeamConfig::parse(YAML).unwrap();
        assert_eq!(config.agents.len(), 2);
    }

    #[test]
    fn rejects_unknown_sub_agent() {
        let bad = YAML.replace("worker", "ghost");
        // root now references itself as sub-agent "ghost" which doesn't exist,
        // while the "ghost:" agent entry also no longer matches "worker" model refs above;
        // simplest: build a config missing the referenced agent entirely.
        let _ = bad;
        let yaml = r#"
version: "2"
agents:
  root:
    model: "anthropic/claude-haiku-4-5"
    instruction: "you are root"
    sub_agents: ["missing"]
"#;
        assert!(AgentTeamConfig::parse(yaml).is_err());
    }
}
