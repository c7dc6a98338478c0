//! Agent Gateway — starts the WebSocket/HTTP server described in §6.1.

use agent_core::{AuthConfig, AuthMode, BindMode, GatewayConfig};
use agent_gateway::{start_gateway, ExtendedConfig};
use agent_store::{InMemoryStore, SessionStore, SqliteStore};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "agent-runtime", about = "Agentic runtime gateway server")]
struct Cli {
    /// Path to the agent/team YAML config.
    #[arg(short, long, default_value = "agents.yaml")]
    config: PathBuf,

    /// Port to listen on.
    #[arg(short, long, default_value = "18789")]
    port: u16,

    /// "loopback" to bind 127.0.0.1 only, anything else binds 0.0.0.0.
    #[arg(short, long, default_value = "lan")]
    bind: String,

    /// Bearer token required of clients. Also read from AGENT_GATEWAY_TOKEN.
    #[arg(short, long)]
    token: Option<String>,

    /// Disable authentication entirely.
    #[arg(long)]
    no_auth: bool,

    /// Workspace root tools operate against (default: current directory).
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// SQLite database path for session persistence. Omit for an in-memory store.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "agent_gateway=info,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bind_mode = match cli.bind.as_str() {
        "loopback" | "localhost" | "127.0.0.1" => BindMode::Loopback,
        _ => BindMode::Lan,
    };
    let auth = if cli.no_auth {
        AuthConfig { mode: AuthMode::None, token: None }
    } else {
        AuthConfig { mode: AuthMode::Token, token: cli.token }
    };
    let workspace_root = cli
        .workspace
        .or_else(|| std::env::var("AGENT_WORKSPACE").ok().map(PathBuf::from))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    let store: Arc<dyn SessionStore> = match cli.db_path {
        Some(path) => Arc::new(SqliteStore::connect(&path.display().to_string()).await?),
        None => Arc::new(InMemoryStore::new()),
    };

    let config = ExtendedConfig {
        gateway: GatewayConfig { port: cli.port, bind: bind_mode, auth },
        workspace_root,
        config_path: cli.config,
    };

    start_gateway(config, store).await
}
