// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests: spawn the real `tymbal-server` binary and drive
//! it over its actual HTTP and WebSocket surface, the way a runtime or a UI
//! client would.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tymbal_protocol::{AgentId, Frame, HubMessage, RuntimeMessage};
use tymbal_specs::ServerProcess;

const HEALTHY_TIMEOUT: Duration = Duration::from_secs(5);
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(url: &str) -> anyhow::Result<WsStream> {
    let (stream, _) = tokio_tungstenite::connect_async(url).await?;
    Ok(stream)
}

async fn send_frame(ws: &mut WsStream, frame: &Frame) -> anyhow::Result<()> {
    ws.send(Message::Text(tymbal_protocol::serialize(frame).into())).await?;
    Ok(())
}

async fn send_runtime_message(ws: &mut WsStream, msg: &RuntimeMessage) -> anyhow::Result<()> {
    let text = serde_json::to_string(msg)?;
    ws.send(Message::Text(text.into())).await?;
    Ok(())
}

async fn recv_text(ws: &mut WsStream) -> anyhow::Result<String> {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("socket closed before a message arrived"))??;
        match msg {
            Message::Text(t) => return Ok(t.to_string()),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => anyhow::bail!("unexpected websocket message: {other:?}"),
        }
    }
}

async fn recv_hub_message(ws: &mut WsStream) -> anyhow::Result<HubMessage> {
    let text = recv_text(ws).await?;
    Ok(serde_json::from_str(&text)?)
}

async fn recv_frame(ws: &mut WsStream) -> anyhow::Result<Frame> {
    let text = recv_text(ws).await?;
    tymbal_protocol::parse(&text).ok_or_else(|| anyhow::anyhow!("not a well-formed frame: {text}"))
}

#[tokio::test]
async fn http_health() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(HEALTHY_TIMEOUT).await?;

    let resp = reqwest::get(format!("{}/v1/health", server.base_url())).await?;
    assert!(resp.status().is_success());
    let body: Value = resp.json().await?;
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn bootstrap_token_issue_and_exchange() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(HEALTHY_TIMEOUT).await?;

    let client = reqwest::Client::new();
    let issued: Value = client
        .post(format!("{}/v1/spaces/sp1/bootstrap-token", server.base_url()))
        .send()
        .await?
        .json()
        .await?;
    let token = issued["token"].as_str().expect("token field present").to_owned();
    assert!(!token.is_empty());

    let exchanged = client
        .post(format!("{}/v1/bootstrap/exchange", server.base_url()))
        .json(&json!({"token": token}))
        .send()
        .await?;
    assert!(exchanged.status().is_success());
    let body: Value = exchanged.json().await?;
    assert_eq!(body["spaceId"], "sp1");
    assert!(!body["credential"].as_str().expect("credential present").is_empty());

    // A second exchange of the same (now-consumed) token must fail.
    let second = client
        .post(format!("{}/v1/bootstrap/exchange", server.base_url()))
        .json(&json!({"token": token}))
        .send()
        .await?;
    assert_eq!(second.status(), reqwest::StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn http_surface_requires_bearer_token_but_health_stays_open() -> anyhow::Result<()> {
    let server = ServerProcess::build().auth_token("s3cr3t").spawn()?;
    server.wait_healthy(HEALTHY_TIMEOUT).await?;

    // Health never requires auth.
    let health = reqwest::get(format!("{}/v1/health", server.base_url())).await?;
    assert!(health.status().is_success());

    let client = reqwest::Client::new();

    // No bearer token: rejected.
    let unauthorized = client
        .get(format!("{}/v1/channels/ch1/connections", server.base_url()))
        .send()
        .await?;
    assert_eq!(unauthorized.status(), reqwest::StatusCode::UNAUTHORIZED);

    // Correct bearer token: accepted.
    let authorized = client
        .get(format!("{}/v1/channels/ch1/connections", server.base_url()))
        .bearer_auth("s3cr3t")
        .send()
        .await?;
    assert!(authorized.status().is_success());
    Ok(())
}

#[tokio::test]
async fn connections_endpoint_lists_active_client() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(HEALTHY_TIMEOUT).await?;

    let mut client_ws = connect(&server.ws_client_url("sp1", "ch1", "ada")).await?;

    // Give the server a moment to register the connection before polling.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let resp =
        reqwest::get(format!("{}/v1/channels/ch1/connections", server.base_url())).await?;
    let connections: Value = resp.json().await?;
    let connections = connections.as_array().expect("array response");
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0]["role"], "client");
    assert_eq!(connections[0]["channel_id"], "ch1");

    client_ws.close(None).await?;
    Ok(())
}

#[tokio::test]
async fn ws_runtime_registration_handshake() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(HEALTHY_TIMEOUT).await?;

    let mut runtime_ws = connect(&server.ws_runtime_url()).await?;
    send_runtime_message(
        &mut runtime_ws,
        &RuntimeMessage::RuntimeReady {
            runtime_id: "rt1".to_owned(),
            space_id: "sp1".to_owned(),
            name: "worker-a".to_owned(),
            machine_info: None,
        },
    )
    .await?;

    match recv_hub_message(&mut runtime_ws).await? {
        HubMessage::RuntimeConnected { runtime_id, protocol_version } => {
            assert_eq!(runtime_id, "rt1");
            assert_eq!(protocol_version, "1.0");
        }
        other => panic!("expected RuntimeConnected, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn ws_runtime_rejects_message_before_ready() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(HEALTHY_TIMEOUT).await?;

    let mut runtime_ws = connect(&server.ws_runtime_url()).await?;
    send_runtime_message(
        &mut runtime_ws,
        &RuntimeMessage::AgentHeartbeat { agent_id: AgentId::new("sp1", "ch1", "fox") },
    )
    .await?;

    match recv_hub_message(&mut runtime_ws).await? {
        HubMessage::Error { error, .. } => assert_eq!(error, "NOT_REGISTERED"),
        other => panic!("expected NOT_REGISTERED error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn agent_checkin_broadcasts_online_state_to_client() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(HEALTHY_TIMEOUT).await?;

    let mut client_ws = connect(&server.ws_client_url("sp1", "ch1", "ada")).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut runtime_ws = connect(&server.ws_runtime_url()).await?;
    send_runtime_message(
        &mut runtime_ws,
        &RuntimeMessage::RuntimeReady {
            runtime_id: "rt1".to_owned(),
            space_id: "sp1".to_owned(),
            name: "worker-a".to_owned(),
            machine_info: None,
        },
    )
    .await?;
    let _connected = recv_hub_message(&mut runtime_ws).await?;

    send_runtime_message(
        &mut runtime_ws,
        &RuntimeMessage::AgentCheckin { agent_id: AgentId::new("sp1", "ch1", "fox") },
    )
    .await?;

    let frame = recv_frame(&mut client_ws).await?;
    match frame {
        Frame::Set { v, .. } => {
            assert_eq!(v["type"], "agent_state");
            assert_eq!(v["state"], "online");
        }
        other => panic!("expected a set frame, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn mention_routed_message_reaches_bound_runtime() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(HEALTHY_TIMEOUT).await?;

    let mut runtime_ws = connect(&server.ws_runtime_url()).await?;
    send_runtime_message(
        &mut runtime_ws,
        &RuntimeMessage::RuntimeReady {
            runtime_id: "rt1".to_owned(),
            space_id: "sp1".to_owned(),
            name: "worker-a".to_owned(),
            machine_info: None,
        },
    )
    .await?;
    let _connected = recv_hub_message(&mut runtime_ws).await?;
    send_runtime_message(
        &mut runtime_ws,
        &RuntimeMessage::AgentCheckin { agent_id: AgentId::new("sp1", "ch1", "fox") },
    )
    .await?;

    let mut client_ws = connect(&server.ws_client_url("sp1", "ch1", "ada")).await?;

    send_frame(
        &mut client_ws,
        &Frame::Set {
            i: "01J0USERMSG0000000000000".to_owned(),
            t: "2026-07-26T00:00:00Z".to_owned(),
            v: json!({"type": "user_message", "content": "hey @fox can you look at this"}),
        },
    )
    .await?;

    // The targeted dispatch arrives over the runtime's control connection.
    match recv_hub_message(&mut runtime_ws).await? {
        HubMessage::Message { agent_id, sender, content, .. } => {
            assert_eq!(agent_id, AgentId::new("sp1", "ch1", "fox"));
            assert_eq!(sender, "ada");
            assert_eq!(content["content"], "hey @fox can you look at this");
        }
        other => panic!("expected a dispatched Message, got {other:?}"),
    }

    // The broadcast itself also reaches the client that sent it.
    let echoed = recv_frame(&mut client_ws).await?;
    assert!(matches!(echoed, Frame::Set { .. }));
    Ok(())
}

#[tokio::test]
async fn runtime_disconnect_marks_agent_offline() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(HEALTHY_TIMEOUT).await?;

    let mut client_ws = connect(&server.ws_client_url("sp1", "ch1", "ada")).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut runtime_ws = connect(&server.ws_runtime_url()).await?;
    send_runtime_message(
        &mut runtime_ws,
        &RuntimeMessage::RuntimeReady {
            runtime_id: "rt1".to_owned(),
            space_id: "sp1".to_owned(),
            name: "worker-a".to_owned(),
            machine_info: None,
        },
    )
    .await?;
    let _connected = recv_hub_message(&mut runtime_ws).await?;
    send_runtime_message(
        &mut runtime_ws,
        &RuntimeMessage::AgentCheckin { agent_id: AgentId::new("sp1", "ch1", "fox") },
    )
    .await?;

    // Drain the "online" broadcast before tearing the runtime down.
    let online = recv_frame(&mut client_ws).await?;
    assert!(matches!(&online, Frame::Set { v, .. } if v["state"] == "online"));

    runtime_ws.close(None).await?;
    drop(runtime_ws);

    let offline = recv_frame(&mut client_ws).await?;
    match offline {
        Frame::Set { v, .. } => {
            assert_eq!(v["type"], "status");
            assert_eq!(v["content"], "offline (runtime disconnected)");
        }
        other => panic!("expected an offline status frame, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn sync_request_replays_persisted_messages() -> anyhow::Result<()> {
    let server = ServerProcess::start()?;
    server.wait_healthy(HEALTHY_TIMEOUT).await?;

    let mut writer = connect(&server.ws_client_url("sp1", "ch1", "ada")).await?;
    send_frame(
        &mut writer,
        &Frame::Set {
            i: "01J0FIRSTMESSAGE00000000".to_owned(),
            t: "2026-07-26T00:00:00Z".to_owned(),
            v: json!({"type": "user_message", "content": "first message, no mentions here"}),
        },
    )
    .await?;
    // Drain the writer's own broadcast echo before moving on.
    let _ = recv_frame(&mut writer).await?;

    let mut reader = connect(&server.ws_client_url("sp1", "ch1", "ben")).await?;
    send_frame(
        &mut reader,
        &Frame::SyncRequest { channel_id: None, since: None, before: None, limit: None },
    )
    .await?;

    let replayed = recv_frame(&mut reader).await?;
    match replayed {
        Frame::Set { v, .. } => assert_eq!(v["content"], "first message, no mentions here"),
        other => panic!("expected a replayed set frame, got {other:?}"),
    }

    let sync_ack = recv_frame(&mut reader).await?;
    assert!(matches!(sync_ack, Frame::SyncResponse { .. }));
    Ok(())
}
