//! WebSocket connection handling (§6.1): one small JSON-RPC envelope in,
//! `Event` frames (plus acks) out.

use crate::protocol::{parse_resume_decision, AckFrame, RpcRequest};
use crate::state::{ActiveRun, GatewayState};
use agent_core::{Message, Session, SessionKey};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut authenticated = matches!(state.auth.mode, agent_core::AuthMode::None);
    let mut subscription: Option<broadcast::Receiver<agent_core::Event>> = None;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        match handle_request(&text, &state, &mut authenticated).await {
                            RequestOutcome::Ack(ack) => {
                                if let Ok(json) = serde_json::to_string(&ack) {
                                    if ws_tx.send(WsMessage::Text(json)).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            RequestOutcome::Subscribed(rx) => subscription = Some(rx),
                            RequestOutcome::None => {}
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        info!("client disconnected");
                        return;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket error");
                        return;
                    }
                    None => return,
                    _ => {}
                }
            }
            event = async {
                match &mut subscription {
                    Some(rx) => Some(rx.recv().await),
                    None => std::future::pending().await,
                }
            } => {
                match event {
                    Some(Ok(event)) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if ws_tx.send(WsMessage::Text(json)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Err(broadcast::error::RecvError::Lagged(n))) => {
                        warn!(dropped = n, "client lagged behind session broadcast");
                    }
                    Some(Err(broadcast::error::RecvError::Closed)) | None => {
                        subscription = None;
                    }
                }
            }
        }
    }
}

enum RequestOutcome {
    Ack(AckFrame),
    Subscribed(broadcast::Receiver<agent_core::Event>),
    None,
}

async fn handle_request(text: &str, state: &Arc<GatewayState>, authenticated: &mut bool) -> RequestOutcome {
    let req: RpcRequest = match serde_json::from_str(text) {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "unparseable message");
            return RequestOutcome::None;
        }
    };

    if req.method == "auth" {
        let token = req.params.get("token").and_then(|v| v.as_str());
        return match state.auth.verify_token(token) {
            Ok(()) => {
                *authenticated = true;
                RequestOutcome::Ack(AckFrame::ok(req.id))
            }
            Err(e) => RequestOutcome::Ack(AckFrame::err(req.id, e)),
        };
    }

    if !*authenticated {
        return RequestOutcome::Ack(AckFrame::err(req.id, "not authenticated"));
    }

    match req.method.as_str() {
        "chat.send" => handle_chat_send(req, state).await,
        "chat.abort" => handle_chat_abort(req, state).await,
        "resume" => handle_resume(req, state).await,
        other => RequestOutcome::Ack(AckFrame::err(req.id, format!("unknown method: {other}"))),
    }
}

async fn handle_chat_send(req: RpcRequest, state: &Arc<GatewayState>) -> RequestOutcome {
    let Some(session_id) = req.params.get("session").and_then(|v| v.as_str()) else {
        return RequestOutcome::Ack(AckFrame::err(req.id, "missing `session`"));
    };
    let Some(message) = req.params.get("message").and_then(|v| v.as_str()) else {
        return RequestOutcome::Ack(AckFrame::err(req.id, "missing `message`"));
    };
    let agent_name = req.params.get("agent").and_then(|v| v.as_str()).unwrap_or("root").to_string();

    let key = SessionKey::new(session_id);
    let mut session = match state.store.get(&key).await {
        Ok(session) => session,
        Err(_) => Session::new(key.clone(), state.workspace_root.display().to_string()),
    };
    session.tools_approved = true;
    session.push_message(Message::user(message.to_string()));

    let sender = state.broadcast_for(&key);
    let cancel = CancellationToken::new();
    state.active_runs.insert(key.clone(), ActiveRun { cancel: cancel.clone() });

    let session = Arc::new(Mutex::new(session));
    let mut rx = state.runtime.clone().run_stream(agent_name, session, cancel);
    let task_state = state.clone();
    let key_for_task = key.clone();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let _ = sender.send(event);
        }
        task_state.active_runs.remove(&key_for_task);
    });

    RequestOutcome::Subscribed(state.broadcast_for(&key).subscribe())
}

async fn handle_chat_abort(req: RpcRequest, state: &Arc<GatewayState>) -> RequestOutcome {
    let Some(session_id) = req.params.get("session").and_then(|v| v.as_str()) else {
        return RequestOutcome::Ack(AckFrame::err(req.id, "missing `session`"));
    };
    let key = SessionKey::new(session_id);
    match state.active_runs.get(&key) {
        Some(run) => {
            run.cancel.cancel();
            RequestOutcome::Ack(AckFrame::ok(req.id))
        }
        None => RequestOutcome::Ack(AckFrame::err(req.id, "no active run for session")),
    }
}

async fn handle_resume(req: RpcRequest, state: &Arc<GatewayState>) -> RequestOutcome {
    let decision = match parse_resume_decision(&req.params) {
        Ok(decision) => decision,
        Err(e) => return RequestOutcome::Ack(AckFrame::err(req.id, e)),
    };
    state.runtime.resume(decision).await;
    RequestOutcome::Ack(AckFrame::ok(req.id))
}
