// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `GET /ws/client` — a UI connection: inbound user frames are mention-routed
//! and dispatched to agents; sync requests replay the message log (spec.md
//! §4.3 "Inbound message handling (client role)").

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tymbal_protocol::{AgentId, Frame, HubMessage, MentionOutcome, SenderKind};

use crate::hub::{ConnectionMeta, ConnectionRole, DirectSender};
use crate::storage::{self, MessageQuery};
use crate::time::iso8601_now;
use crate::transport::auth;
use crate::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct ClientWsQuery {
    pub token: Option<String>,
    pub space: String,
    pub channel: String,
    pub user: String,
}

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClientWsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let query_str = query.token.as_ref().map(|t| format!("token={t}")).unwrap_or_default();
    if auth::validate_ws_query(&query_str, state.config.auth_token.as_deref()).is_err() {
        return axum::http::StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| handle_client_ws(socket, state, query)).into_response()
}

async fn handle_client_ws(socket: WebSocket, state: Arc<AppState>, query: ClientWsQuery) {
    let connection_id = tymbal_protocol::new_id();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    state
        .hub
        .add(
            connection_id.clone(),
            query.channel.clone(),
            ConnectionRole::Client,
            ConnectionMeta::default(),
            Arc::new(DirectSender::new(tx)),
        )
        .await;
    state.roster.add_user(&query.channel, &query.user).await;

    let (mut ws_tx, mut ws_rx) = socket.split();

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

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound_line(&state, &connection_id, &query, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.roster.remove_user(&query.channel, &query.user).await;
    state.hub.close(&connection_id).await;
}

async fn handle_inbound_line(state: &Arc<AppState>, connection_id: &str, query: &ClientWsQuery, line: &str) {
    let Some(frame) = tymbal_protocol::parse(line) else {
        let err = Frame::Error { error: "invalid_frame".to_owned(), message: None };
        state.hub.send(connection_id, &tymbal_protocol::serialize(&err)).await;
        return;
    };

    match frame {
        Frame::SyncRequest { channel_id, since, before, limit } => {
            handle_sync_request(state, connection_id, query, channel_id, since, before, limit).await;
        }
        Frame::Set { i, t, mut v } => {
            tymbal_protocol::normalize_set_value(&mut v);
            let frame = Frame::Set { i, t, v };
            handle_user_frame(state, query, frame).await;
        }
        other => {
            handle_user_frame(state, query, other).await;
        }
    }
}

async fn handle_sync_request(
    state: &Arc<AppState>,
    connection_id: &str,
    query: &ClientWsQuery,
    channel_id: Option<String>,
    since: Option<String>,
    before: Option<String>,
    limit: Option<u64>,
) {
    let channel_id = channel_id.unwrap_or_else(|| query.channel.clone());
    let query_limit = limit.unwrap_or(state.config.default_sync_limit);
    let messages = state
        .storage
        .list_messages(&channel_id, MessageQuery { since, before, limit: query_limit })
        .await
        .unwrap_or_default();

    let mut last_seen = iso8601_now();
    for record in messages {
        let frame = Frame::Set {
            i: record.id,
            t: record.created_at.clone(),
            v: json!({
                "type": record.message_type,
                "sender": record.sender,
                "senderType": record.sender_type,
                "content": record.content,
            }),
        };
        last_seen = record.created_at;
        state.hub.send(connection_id, &tymbal_protocol::serialize(&frame)).await;
    }

    let reply = Frame::SyncResponse { sync: last_seen };
    state.hub.send(connection_id, &tymbal_protocol::serialize(&reply)).await;
}

/// Mention-route a user frame, persist it, broadcast it, and dispatch it to
/// every targeted agent that is already online or busy.
async fn handle_user_frame(state: &Arc<AppState>, query: &ClientWsQuery, frame: Frame) {
    let agent_scope = AgentId::new(&query.space, &query.channel, &query.user);

    if let Err(e) =
        storage::persist_set_frame(&*state.storage, &agent_scope, &query.user, "user", &iso8601_now(), &frame).await
    {
        tracing::warn!(channel = %query.channel, error = %e, "failed to persist user frame");
    }
    state.hub.broadcast(&query.channel, &tymbal_protocol::serialize(&frame)).await;

    let Frame::Set { v, .. } = &frame else { return };
    let Some(text) = v.get("content").and_then(|c| c.as_str()) else { return };

    let roster = state.roster.roster_view(&query.channel).await;
    let outcome = tymbal_protocol::route_mentions(text, Some(&query.user), SenderKind::User, &roster);
    dispatch_to_targets(state, query, &frame, &outcome).await;
}

async fn dispatch_to_targets(
    state: &Arc<AppState>,
    query: &ClientWsQuery,
    frame: &Frame,
    outcome: &MentionOutcome,
) {
    let Frame::Set { v, .. } = frame else { return };

    for callsign in &outcome.targets {
        let agent_id = AgentId::new(&query.space, &query.channel, callsign);
        let agent_state = state.lifecycle.state(&agent_id).await;
        if !matches!(agent_state, crate::lifecycle::AgentState::Online | crate::lifecycle::AgentState::Busy) {
            tracing::debug!(%agent_id, ?agent_state, "message target is not active, dropping");
            continue;
        }
        let Some(runtime_id) = state.lifecycle.runtime_id(&agent_id).await else { continue };
        let Some(connection_id) = state.hub.runtime_connection_id(&runtime_id).await else { continue };

        let message = HubMessage::Message {
            agent_id: agent_id.clone(),
            message_id: tymbal_protocol::new_id(),
            content: v.clone(),
            sender: query.user.clone(),
            system_prompt: None,
            mcp_servers: None,
            environment: None,
            props: None,
        };
        let line = serde_json::to_string(&message).unwrap_or_default();
        state.hub.send(&connection_id, &line).await;
    }
}
