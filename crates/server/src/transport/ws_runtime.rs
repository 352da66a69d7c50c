// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `GET /ws/runtime` — a runtime's control connection (spec.md §4.4).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tymbal_protocol::{AgentId, HubMessage, RuntimeMessage, PROTOCOL_VERSION};

use crate::hub::{ConnectionMeta, ConnectionRole, DirectSender};
use crate::storage::{self, RuntimeRecord};
use crate::time::iso8601_now;
use crate::transport::auth;
use crate::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeWsQuery {
    pub token: Option<String>,
}

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RuntimeWsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let query_str = query.token.as_ref().map(|t| format!("token={t}")).unwrap_or_default();
    if auth::validate_ws_query(&query_str, state.config.auth_token.as_deref()).is_err() {
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| handle_runtime_ws(socket, state)).into_response()
}

/// Registration state accumulated over the lifetime of one runtime
/// connection. Not registered until `runtime_ready` is received.
#[derive(Default)]
struct Registration {
    runtime_id: Option<String>,
    space_id: Option<String>,
}

async fn handle_runtime_ws(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = tymbal_protocol::new_id();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    state
        .hub
        .add(
            connection_id.clone(),
            crate::hub::PENDING_CHANNEL,
            ConnectionRole::Runtime,
            ConnectionMeta::default(),
            Arc::new(DirectSender::new(tx)),
        )
        .await;

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut registration = Registration::default();
    let mut ping_tick = tokio::time::interval(state.config.ping_interval());
    ping_tick.tick().await; // first tick fires immediately; discard it.
    let mut missed_pongs: u32 = 0;

    loop {
        tokio::select! {
            forwarded = rx.recv() => {
                match forwarded {
                    Some(line) => {
                        if ws_tx.send(Message::Text(line.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = ping_tick.tick() => {
                if missed_pongs >= state.config.max_missed_pongs {
                    tracing::warn!(%connection_id, "runtime missed too many pongs, closing");
                    break;
                }
                missed_pongs += 1;
                let ping = HubMessage::Ping { timestamp: iso8601_now() };
                let line = serde_json::to_string(&ping).unwrap_or_default();
                state.hub.send(&connection_id, &line).await;
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text.trim() == "" { continue; }
                        match serde_json::from_str::<RuntimeMessage>(&text) {
                            Ok(msg) => {
                                if matches!(msg, RuntimeMessage::Pong { .. }) {
                                    missed_pongs = 0;
                                }
                                handle_runtime_message(&state, &connection_id, &mut registration, msg).await;
                            }
                            Err(e) => {
                                tracing::warn!(%connection_id, error = %e, "malformed runtime message");
                                let err = HubMessage::Error {
                                    error: "INVALID_MESSAGE".to_owned(),
                                    message: Some(e.to_string()),
                                };
                                let line = serde_json::to_string(&err).unwrap_or_default();
                                state.hub.send(&connection_id, &line).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.hub.close(&connection_id).await;
    handle_runtime_disconnect(&state, &connection_id).await;
}

async fn handle_runtime_message(
    state: &Arc<AppState>,
    connection_id: &str,
    registration: &mut Registration,
    msg: RuntimeMessage,
) {
    let RuntimeMessage::RuntimeReady { .. } = &msg else {
        if registration.runtime_id.is_none() {
            let err = HubMessage::Error { error: "NOT_REGISTERED".to_owned(), message: None };
            let line = serde_json::to_string(&err).unwrap_or_default();
            state.hub.send(connection_id, &line).await;
            return;
        }
        dispatch_registered_message(state, registration, msg).await;
        return;
    };

    let RuntimeMessage::RuntimeReady { runtime_id, space_id, name, .. } = msg else { unreachable!() };
    let effective_id = state.runtimes.register_or_reclaim(&runtime_id, &space_id, &name, connection_id).await;
    state.hub.bind_runtime(connection_id, effective_id.clone()).await;
    registration.runtime_id = Some(effective_id.clone());
    registration.space_id = Some(space_id.clone());

    let _ = state
        .storage
        .upsert_runtime(RuntimeRecord {
            id: effective_id.clone(),
            space_id,
            name,
            kind: "runtime".to_owned(),
            status: "online".to_owned(),
            config: Value::Null,
            last_seen_at: iso8601_now(),
            created_at: iso8601_now(),
        })
        .await;

    let reply = HubMessage::RuntimeConnected { runtime_id: effective_id, protocol_version: PROTOCOL_VERSION.to_owned() };
    let line = serde_json::to_string(&reply).unwrap_or_default();
    state.hub.send(connection_id, &line).await;
}

async fn dispatch_registered_message(state: &Arc<AppState>, registration: &Registration, msg: RuntimeMessage) {
    let Some(runtime_id) = registration.runtime_id.clone() else { return };

    match msg {
        RuntimeMessage::RuntimeReady { .. } => {}
        RuntimeMessage::AgentCheckin { agent_id } => {
            state.roster.upsert_agent(&agent_id.channel_id, &agent_id.callsign, "unknown").await;
            state.roster.bind_runtime(&agent_id.channel_id, &agent_id.callsign, &runtime_id).await;
            state.roster.record_heartbeat(&agent_id.channel_id, &agent_id.callsign).await;
            state.lifecycle.on_checkin(&agent_id).await;
            broadcast_agent_state(state, &agent_id, "online").await;
        }
        RuntimeMessage::AgentHeartbeat { agent_id } => {
            state.runtimes.refresh_heartbeat(&runtime_id).await;
            state.roster.record_heartbeat(&agent_id.channel_id, &agent_id.callsign).await;
            let current = state.lifecycle.state(&agent_id).await;
            broadcast_agent_state(state, &agent_id, lifecycle_state_label(current)).await;
        }
        RuntimeMessage::Frame { agent_id, mut frame } => {
            state.runtimes.refresh_heartbeat(&runtime_id).await;
            state.roster.record_heartbeat(&agent_id.channel_id, &agent_id.callsign).await;

            if let tymbal_protocol::Frame::Set { v, .. } = &mut frame {
                tymbal_protocol::normalize_set_value(v);
                if v.get("type").and_then(|t| t.as_str()) == Some("error") {
                    state.lifecycle.mark_error(&agent_id).await;
                } else {
                    state.lifecycle.on_set_frame(&agent_id, v).await;
                }
            }

            let line = tymbal_protocol::serialize(&frame);
            state.hub.broadcast(&agent_id.channel_id, &line).await;

            if let Err(e) =
                storage::persist_set_frame(&*state.storage, &agent_id, &agent_id.callsign, "agent", &iso8601_now(), &frame)
                    .await
            {
                tracing::warn!(%agent_id, error = %e, "failed to persist frame");
            }
        }
        RuntimeMessage::Pong { .. } => {}
    }
}

fn lifecycle_state_label(state: crate::lifecycle::AgentState) -> &'static str {
    match state {
        crate::lifecycle::AgentState::Offline => "offline",
        crate::lifecycle::AgentState::Activating => "activating",
        crate::lifecycle::AgentState::Online => "online",
        crate::lifecycle::AgentState::Busy => "busy",
        crate::lifecycle::AgentState::Suspending => "suspending",
        crate::lifecycle::AgentState::Error => "error",
    }
}

async fn broadcast_agent_state(state: &Arc<AppState>, agent_id: &AgentId, label: &str) {
    let frame = tymbal_protocol::Frame::Set {
        i: tymbal_protocol::new_id(),
        t: iso8601_now(),
        v: json!({"type": "agent_state", "state": label}),
    };
    let line = tymbal_protocol::serialize(&frame);
    state.hub.broadcast(&agent_id.channel_id, &line).await;
}

/// On close of a runtime's control connection: mark it offline and move
/// every agent it was serving to `offline`, broadcasting a status frame
/// per agent (spec.md §4.4 "Disconnect handling", scenario S6).
async fn handle_runtime_disconnect(state: &Arc<AppState>, connection_id: &str) {
    let Some(runtime_id) = state.runtimes.mark_offline_by_connection(connection_id).await else { return };
    let space_id = state.runtimes.space_id(&runtime_id).await.unwrap_or_default();

    for (channel_id, callsign) in state.roster.agents_bound_to_runtime(&runtime_id).await {
        let agent_id = AgentId::new(&space_id, &channel_id, &callsign);
        state.lifecycle.mark_offline(&agent_id).await;
        state.roster.clear_runtime(&channel_id, &callsign).await;

        let frame = tymbal_protocol::Frame::Set {
            i: tymbal_protocol::new_id(),
            t: iso8601_now(),
            v: json!({"type": "status", "content": "offline (runtime disconnected)"}),
        };
        let line = tymbal_protocol::serialize(&frame);
        state.hub.broadcast(&channel_id, &line).await;
    }
}
