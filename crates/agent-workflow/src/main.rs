//! One-shot workflow runner: loads an agent-team YAML config, builds its
//! `Team`, and drives the configured `workflow` to completion against a
//! single prompt, printing each step event as it lands.

use agent_core::AgentTeamConfig;
use agent_runtime::{build_team, LocalRuntime};
use agent_workflow::WorkflowExecutor;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "agent-workflow", about = "Run a configured agent workflow to completion")]
struct Cli {
    /// Path to the agent-team YAML config (must declare a `workflow`).
    #[arg(short, long)]
    config: PathBuf,

    /// Prompt fed to the workflow's first step.
    #[arg(short, long)]
    prompt: String,

    /// Workspace directory each step's tools are rooted at.
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "agent_workflow=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AgentTeamConfig::load(&cli.config)?;
    let workflow = config
        .workflow
        .clone()
        .ok_or_else(|| anyhow::anyhow!("config at {} has no workflow section", cli.config.display()))?;

    let workspace_root = cli.workspace.canonicalize().unwrap_or(cli.workspace);
    let team = build_team(&config, &workspace_root)?;
    let runtime = LocalRuntime::new(Arc::new(team));

    let executor = Arc::new(WorkflowExecutor::new(
        runtime,
        workflow.steps().to_vec(),
        workflow.max_loop_iterations(),
    )?);

    let mut rx = executor.run(cli.prompt, workspace_root.display().to_string(), CancellationToken::new());
    while let Some(event) = rx.recv().await {
        match event {
            agent_core::Event::WorkflowStepStarted { step_id } => println!("[{step_id}] started"),
            agent_core::Event::WorkflowStepCompleted { step_id, output } => {
                println!("[{step_id}] completed: {output}")
            }
            agent_core::Event::WorkflowStepFailed { step_id, error } => {
                eprintln!("[{step_id}] failed: {error}")
            }
            agent_core::Event::WorkflowCompleted { output } => println!("workflow completed: {output}"),
            _ => {}
        }
    }

    Ok(())
}
