//! Builds a runtime-ready `Team` from the YAML-loaded `AgentTeamConfig`
//! (§6). Shared by the gateway server binary and the one-shot workflow
//! runner so config → team wiring lives in exactly one place.

use crate::agent::{Agent, ModelHandle, Team};
use crate::error::{Result, RuntimeError};
use agent_core::config::{AgentConfigEntry, AgentTeamConfig};
use agent_llm::{AnthropicProvider, ModelProvider};
use agent_tools::{create_default_registry, create_policy_registry, ToolSet};
use std::path::Path;
use std::sync::Arc;

/// Resolve a `provider/name` pair into a live `ModelProvider`. Only the
/// Anthropic adapter ships today; unknown provider prefixes are a config
/// error surfaced before any runtime starts.
fn provider_for(provider: &str) -> Result<Arc<dyn ModelProvider>> {
    match provider {
        "anthropic" => {
            let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
            Ok(Arc::new(AnthropicProvider::new(api_key)))
        }
        other => Err(RuntimeError::UnknownModel(format!("unsupported provider: {other}"))),
    }
}

/// Resolve an agent's `model` field: either a key into `config.models`, or a
/// literal `provider/name` string (§6).
fn resolve_model(config: &AgentTeamConfig, model_ref: &str) -> Result<(Arc<dyn ModelProvider>, String)> {
    if let Some(entry) = config.models.get(model_ref) {
        let provider = provider_for(&entry.provider)?;
        return Ok((provider, entry.name.clone()));
    }
    let (provider_name, model_name) = model_ref
        .split_once('/')
        .ok_or_else(|| RuntimeError::UnknownModel(model_ref.to_string()))?;
    let provider = provider_for(provider_name)?;
    Ok((provider, model_name.to_string()))
}

/// Build the toolset an agent config entry asks for. An empty `toolsets`
/// list gets the full default registry; a non-empty one is treated as an
/// allow-list of tool names (§4.3.1 policy scoping).
fn build_toolset(entry: &AgentConfigEntry, workspace_root: &Path) -> Result<Arc<dyn ToolSet>> {
    if entry.toolsets.is_empty() {
        Ok(Arc::new(create_default_registry(workspace_root)))
    } else {
        let names: Vec<&str> = entry.toolsets.iter().map(String::as_str).collect();
        Ok(Arc::new(create_policy_registry(workspace_root, &names)?))
    }
}

/// Construct a fully wired `Team` from `config`, rooting every agent's
/// default toolset at `workspace_root`. Assumes `config.validate()` already
/// passed (model/sub-agent references are trusted to resolve).
pub fn build_team(config: &AgentTeamConfig, workspace_root: &Path) -> Result<Team> {
    let mut team = Team::new();

    for (name, model) in &config.models {
        let provider = provider_for(&model.provider)?;
        team.register_model(name.clone(), provider);
    }

    for (name, entry) in &config.agents {
        let (provider, model_name) = resolve_model(config, &entry.model)?;
        let toolset = build_toolset(entry, workspace_root)?;
        let agent = Agent {
            name: name.clone(),
            instruction: entry.instruction.clone(),
            model: ModelHandle::new(provider, model_name),
            toolsets: vec![toolset],
            sub_agents: entry.sub_agents.clone(),
            num_history_items: entry.num_history_items,
            enable_bang_commands: entry.enable_bang_commands,
            max_iterations: 0,
        };
        team.register_agent(agent);
    }

    Ok(team)
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
version: "2"
agents:
  root:
    model: "anthropic/claude-haiku-4-5-20251001"
    instruction: "you are root"
    sub_agents: ["worker"]
  worker:
    model: "anthropic/claude-haiku-4-5-20251001"
    instruction: "you are worker"
    toolsets: ["read", "glob"]
"#;

    #[test]
    fn builds_team_with_literal_provider_refs() {
        let config = AgentTeamConfig::parse(YAML).unwrap();
        let team = build_team(&config, Path::new("/tmp")).unwrap();
        assert!(team.agent("root").is_some());
        assert!(team.agent("worker").is_some());
    }

    #[test]
    fn unknown_provider_prefix_is_an_error() {
        let yaml = YAML.replace("anthropic/", "openai/");
        let config = AgentTeamConfig::parse(&yaml).unwrap();
        assert!(build_team(&config, Path::new("/tmp")).is_err());
    }
}
