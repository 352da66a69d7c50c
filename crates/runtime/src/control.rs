// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The runtime's control-channel client: connects to `tymbal-server`'s
//! `/ws/runtime` endpoint, performs the `runtime_ready`/`runtime_connected`
//! handshake, answers `ping` transparently, and reconnects with jittered
//! exponential backoff on any drop (spec.md §4.4, §6). Grounded on the
//! teacher's `driver::process::ProcessMonitor` retry-until-alive loop,
//! repurposed from polling a child process to polling a WebSocket.

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tymbal_protocol::{HubMessage, RuntimeMessage, PROTOCOL_VERSION};

use crate::config::RuntimeConfig;

/// The stable pair of channels a supervisor uses to talk to the server,
/// unaffected by reconnects happening underneath.
pub struct ControlHandle {
    pub outbound: mpsc::UnboundedSender<RuntimeMessage>,
    pub inbound: mpsc::UnboundedReceiver<HubMessage>,
}

/// Connect to the server and run the reconnect loop in the background.
/// Returns immediately with the stable channel pair.
pub fn spawn(config: RuntimeConfig) -> ControlHandle {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<RuntimeMessage>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<HubMessage>();
    tokio::spawn(run_with_reconnect(config, outbound_rx, inbound_tx));
    ControlHandle { outbound: outbound_tx, inbound: inbound_rx }
}

async fn run_with_reconnect(
    config: RuntimeConfig,
    mut outbound_rx: mpsc::UnboundedReceiver<RuntimeMessage>,
    inbound_tx: mpsc::UnboundedSender<HubMessage>,
) {
    let mut backoff = config.reconnect_min();
    loop {
        match run_session(&config, &mut outbound_rx, &inbound_tx).await {
            Ok(()) => {
                tracing::info!("control channel closed, reconnecting");
                backoff = config.reconnect_min();
            }
            Err(e) => {
                tracing::warn!(error = %e, "control channel error, reconnecting");
            }
        }
        if inbound_tx.is_closed() {
            // The supervisor dropped its half; nothing left to serve.
            return;
        }
        let jitter_ms = rand::rng().random_range(0..=100);
        tokio::time::sleep(backoff + std::time::Duration::from_millis(jitter_ms)).await;
        backoff = std::cmp::min(backoff * 2, config.reconnect_max());
    }
}

async fn run_session(
    config: &RuntimeConfig,
    outbound_rx: &mut mpsc::UnboundedReceiver<RuntimeMessage>,
    inbound_tx: &mpsc::UnboundedSender<HubMessage>,
) -> anyhow::Result<()> {
    let url = match &config.token {
        Some(token) => format!("{}?token={}", config.server_url, token),
        None => config.server_url.clone(),
    };
    let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let ready = RuntimeMessage::RuntimeReady {
        runtime_id: config.runtime_id.clone().unwrap_or_default(),
        space_id: config.space_id.clone(),
        name: config.name.clone(),
        machine_info: None,
    };
    send(&mut ws_tx, &ready).await?;

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                let Some(outgoing) = outgoing else { return Ok(()) };
                send(&mut ws_tx, &outgoing).await?;
            }
            incoming = ws_rx.next() => {
                let Some(incoming) = incoming else { return Ok(()) };
                let incoming = incoming?;
                let Message::Text(text) = incoming else { continue };
                let Ok(msg) = serde_json::from_str::<HubMessage>(&text) else {
                    tracing::warn!(%text, "malformed hub message, ignoring");
                    continue;
                };
                if let HubMessage::Ping { timestamp } = &msg {
                    send(&mut ws_tx, &RuntimeMessage::Pong { timestamp: timestamp.clone() }).await?;
                    continue;
                }
                if inbound_tx.send(msg).is_err() {
                    return Ok(());
                }
            }
        }
    }
}

async fn send(
    ws_tx: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    msg: &RuntimeMessage,
) -> anyhow::Result<()> {
    let line = serde_json::to_string(msg)?;
    ws_tx.send(Message::Text(line.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_handshake_serializes_with_configured_identity() {
        let ready = RuntimeMessage::RuntimeReady {
            runtime_id: "rt1".to_owned(),
            space_id: "sp1".to_owned(),
            name: "worker-a".to_owned(),
            machine_info: None,
        };
        let json = serde_json::to_string(&ready).expect("serializes");
        assert!(json.contains("\"type\":\"runtime_ready\""));
        assert!(json.contains(PROTOCOL_VERSION) || !json.contains("protocolVersion"));
    }

    #[test]
    fn backoff_doubles_up_to_the_configured_ceiling() {
        let mut backoff = std::time::Duration::from_millis(500);
        let max = std::time::Duration::from_millis(2_000);
        for _ in 0..5 {
            backoff = std::cmp::min(backoff * 2, max);
        }
        assert_eq!(backoff, max);
    }
}
