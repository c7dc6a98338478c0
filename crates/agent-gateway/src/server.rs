//! The gateway's Axum router (§6.1): `GET /ws`, `GET /health`,
//! `GET /sessions/{id}`.

use crate::auth::ResolvedAuth;
use crate::state::GatewayState;
use crate::ws::handle_connection;
use agent_core::{GatewayConfig, SessionKey};
use agent_runtime::{build_team, PersistentRuntime};
use agent_store::SessionStore;
use axum::{
    extract::{Path as AxumPath, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub struct ExtendedConfig {
    pub gateway: GatewayConfig,
    pub workspace_root: PathBuf,
    pub config_path: PathBuf,
}

impl Default for ExtendedConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            workspace_root: std::env::current_dir().unwrap_or_default(),
            config_path: PathBuf::from("agents.yaml"),
        }
    }
}

pub async fn start_gateway(config: ExtendedConfig, store: Arc<dyn SessionStore>) -> anyhow::Result<()> {
    let env_token = std::env::var("AGENT_GATEWAY_TOKEN").ok();
    let auth = ResolvedAuth::from_config(&config.gateway.auth, env_token);

    let team_config = agent_core::AgentTeamConfig::load(&config.config_path)?;
    let team = Arc::new(build_team(&team_config, &config.workspace_root)?);
    let local_runtime = agent_runtime::LocalRuntime::new(team.clone());
    let runtime = PersistentRuntime::new(local_runtime, store.clone());

    let state = Arc::new(GatewayState {
        auth,
        team,
        store,
        runtime,
        workspace_root: config.workspace_root.clone(),
        broadcasts: Default::default(),
        active_runs: Default::default(),
        started_at: std::time::Instant::now(),
    });

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/sessions/{id}", get(session_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state);

    let bind_addr: SocketAddr = format!("{}:{}", config.gateway.bind.to_addr(), config.gateway.port)
        .parse()
        .expect("invalid bind address");

    info!("agent gateway v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  listening on: {bind_addr}");
    info!("  websocket:    ws://{bind_addr}/ws");
    info!("  sessions:     http://{bind_addr}/sessions/{{id}}");
    info!("  auth mode:    {:?}", config.gateway.auth.mode);
    info!("  workspace:    {:?}", config.workspace_root);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let sessions = state.store.list().await.map(|s| s.len()).unwrap_or(0);
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": sessions,
        "agents": state.team.agent_names(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

/// Dump a session's stored transcript, analogous to the `.ctx`-serving
/// endpoint this is grounded on, but backed by whichever `SessionStore` is
/// configured instead of a fixed flat file.
async fn session_handler(AxumPath(id): AxumPath<String>, State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let key = SessionKey::new(&id);
    match state.store.get(&key).await {
        Ok(session) => Json(serde_json::to_value(&session).unwrap_or_default()).into_response(),
        Err(e) => (axum::http::StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}
