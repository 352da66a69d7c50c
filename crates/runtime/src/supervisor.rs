// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ties the engine registry, the control-channel client, and per-message
//! scratchpads together: turns `activate`/`message`/`suspend` commands
//! into engine spawns/sends/terminates, and turns engine output into
//! frames forwarded back to the server. Grounded on the teacher's
//! `session::run::run_session` top-level event loop, generalized from
//! "drive one PTY session" to "drive N agent workers behind one control
//! connection".

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tymbal_protocol::{AgentId, Frame, HubMessage, RuntimeMessage};

use crate::config::RuntimeConfig;
use crate::control::ControlHandle;
use crate::engine::{EngineHandle, EngineInput, EngineRegistry, SpawnOptions};
use crate::message_handle::MessageHandle;

/// Runtime-side state for one active agent: its engine handle. The
/// in-flight message scratchpads its output is translated through live in
/// the output pump task (`spawn_output_pump`), not here.
struct AgentWorker {
    engine: Arc<EngineHandle>,
}

/// Drives every active agent on this runtime from a single control
/// connection and a single engine registry.
pub struct Supervisor {
    config: RuntimeConfig,
    registry: EngineRegistry,
    control: ControlHandle,
    workers: HashMap<String, AgentWorker>,
}

impl Supervisor {
    pub fn new(config: RuntimeConfig, registry: EngineRegistry, control: ControlHandle) -> Self {
        Self { config, registry, control, workers: HashMap::new() }
    }

    /// Consume `HubMessage`s from the control channel until it closes.
    pub async fn run(mut self) {
        while let Some(msg) = self.control.inbound.recv().await {
            self.handle_hub_message(msg).await;
        }
    }

    async fn handle_hub_message(&mut self, msg: HubMessage) {
        match msg {
            HubMessage::RuntimeConnected { .. } => {}
            HubMessage::Activate { agent_id, system_prompt, mcp_servers, workspace_path } => {
                self.activate(agent_id, system_prompt, mcp_servers, workspace_path).await;
            }
            HubMessage::Message { agent_id, message_id, content, sender, system_prompt, mcp_servers, environment, props: _ } => {
                self.message(agent_id, message_id, content, sender, system_prompt, mcp_servers, environment).await;
            }
            HubMessage::Suspend { agent_id, reason } => {
                self.suspend(agent_id, reason).await;
            }
            HubMessage::Ping { .. } => {}
            HubMessage::Error { error, message } => {
                tracing::warn!(%error, ?message, "hub rejected a prior message");
            }
        }
    }

    async fn activate(&mut self, agent_id: AgentId, system_prompt: String, mcp_servers: Option<Value>, workspace_path: String) {
        let key = agent_id.to_string();
        if self.workers.contains_key(&key) {
            tracing::debug!(%agent_id, "activate received for an already-active agent, ignoring");
            return;
        }

        let spawner = match self.registry.select(&self.config.default_engine) {
            Ok(spawner) => spawner,
            Err(e) => {
                tracing::warn!(%agent_id, error = %e, "no engine available for activation");
                return;
            }
        };

        let mcp_servers = crate::engine::url_rewrite::apply_if_configured(mcp_servers.as_ref(), self.config.localhost_alias.as_deref());
        let opts = SpawnOptions {
            agent_id: agent_id.clone(),
            system_prompt,
            mcp_servers,
            workspace_path,
            environment: None,
        };

        let (output_tx, output_rx) = mpsc::unbounded_channel::<Value>();
        let engine = match spawner.spawn(opts, output_tx).await {
            Ok(engine) => engine,
            Err(e) => {
                tracing::warn!(%agent_id, error = %e, "engine spawn failed");
                let frame = error_frame(&e.to_string());
                self.send_frame(&agent_id, frame);
                return;
            }
        };

        self.spawn_output_pump(agent_id.clone(), output_rx);
        self.workers.insert(key, AgentWorker { engine });

        let _ = self.control.outbound.send(RuntimeMessage::AgentCheckin { agent_id });
    }

    async fn message(
        &mut self,
        agent_id: AgentId,
        message_id: String,
        content: Value,
        sender: String,
        _system_prompt: Option<String>,
        _mcp_servers: Option<Value>,
        _environment: Option<Value>,
    ) {
        let key = agent_id.to_string();
        let Some(worker) = self.workers.get(&key) else {
            tracing::debug!(%agent_id, "message received for an inactive agent, dropping");
            return;
        };
        let input = EngineInput::UserMessage { message_id, sender, content };
        if let Err(e) = worker.engine.send(input) {
            tracing::warn!(%agent_id, error = %e, "failed to deliver message to engine");
        }
    }

    async fn suspend(&mut self, agent_id: AgentId, reason: Option<String>) {
        let key = agent_id.to_string();
        if let Some(worker) = self.workers.remove(&key) {
            worker.engine.terminate(reason).await;
        }
    }

    /// Spawn a background task translating one agent's raw engine output
    /// into frames, using a fresh [`MessageHandle`] per message id
    /// (grounded on `session::transition::feed_output`'s buffer-then-emit
    /// discipline, applied per message id rather than per session).
    fn spawn_output_pump(&self, agent_id: AgentId, mut output_rx: mpsc::UnboundedReceiver<Value>) {
        let outbound = self.control.outbound.clone();
        tokio::spawn(async move {
            let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Frame>();
            let forward_agent_id = agent_id.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(frame) = frames_rx.recv().await {
                    let _ = outbound.send(RuntimeMessage::Frame { agent_id: forward_agent_id.clone(), frame });
                }
            });

            let mut handles: HashMap<String, MessageHandle> = HashMap::new();
            while let Some(value) = output_rx.recv().await {
                translate_output(&agent_id, value, &mut handles, &frames_tx);
            }
            drop(frames_tx);
            let _ = forwarder.await;
        });
    }

    fn send_frame(&self, agent_id: &AgentId, frame: Frame) {
        let _ = self.control.outbound.send(RuntimeMessage::Frame { agent_id: agent_id.clone(), frame });
    }
}

fn error_frame(detail: &str) -> Frame {
    let category = crate::error::classify_error_detail(detail);
    Frame::Set {
        i: tymbal_protocol::new_id(),
        t: now_iso8601(),
        v: serde_json::json!({"type": "error", "category": category.as_str(), "content": detail}),
    }
}

fn now_iso8601() -> String {
    // Duplicated deliberately, see `message_handle::iso8601_now`: each
    // binary stamps its own timestamps without a cross-crate dependency.
    use std::time::{SystemTime, UNIX_EPOCH};

    let dur = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = dur.as_secs();
    let time_secs = secs % 86400;
    let hours = time_secs / 3600;
    let minutes = (time_secs % 3600) / 60;
    let seconds = time_secs % 60;
    let days = secs / 86400;
    let z = days as i64 + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    format!("{y:04}-{m:02}-{d:02}T{hours:02}:{minutes:02}:{seconds:02}Z")
}

/// Translate one raw SDK-shape output message into `stream`/`set` calls
/// against the message id's scratchpad. Shape: `{messageId?, type,
/// delta?, done?, ...rest}` — a `delta` is appended; anything without a
/// `delta`, or an explicit `done:true`, finalizes the message with the
/// whole payload (minus the envelope fields) as its value.
fn translate_output(agent_id: &AgentId, mut value: Value, handles: &mut HashMap<String, MessageHandle>, frames_tx: &mpsc::UnboundedSender<Frame>) {
    let Value::Object(obj) = &mut value else { return };

    let message_id = obj.remove("messageId").and_then(|v| v.as_str().map(str::to_owned)).unwrap_or_else(tymbal_protocol::new_id);
    let delta = obj.remove("delta").and_then(|v| v.as_str().map(str::to_owned));
    let done = obj.remove("done").and_then(|v| v.as_bool()).unwrap_or(delta.is_none());

    let handle = handles.entry(message_id.clone()).or_insert_with(|| {
        let mut metadata = Map::new();
        if let Some(t) = obj.get("type") {
            metadata.insert("type".to_owned(), t.clone());
        }
        metadata.insert("sender".to_owned(), Value::String(agent_id.callsign.clone()));
        metadata.insert("senderType".to_owned(), Value::String("agent".to_owned()));
        MessageHandle::new(message_id.clone(), Some(metadata), frames_tx.clone())
    });

    if handle.is_finalized() {
        return;
    }

    if let Some(delta) = delta {
        let _ = handle.stream(delta);
    }
    if done {
        let _ = handle.set(Value::Object(obj.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn streaming_delta_then_done_emits_start_append_set() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = HashMap::new();
        let agent_id = AgentId::new("sp", "ch", "fox");

        translate_output(&agent_id, json!({"messageId": "m1", "type": "assistant", "delta": "Hello "}), &mut handles, &tx);
        translate_output(&agent_id, json!({"messageId": "m1", "type": "assistant", "delta": "world!", "done": true, "content": "Hello world!"}), &mut handles, &tx);

        let start = rx.try_recv().expect("start");
        assert!(matches!(start, Frame::Start { i, .. } if i == "m1"));
        let append1 = rx.try_recv().expect("append1");
        assert_eq!(append1, Frame::Append { i: "m1".to_owned(), a: "Hello ".to_owned() });
        let append2 = rx.try_recv().expect("append2");
        assert_eq!(append2, Frame::Append { i: "m1".to_owned(), a: "world!".to_owned() });
        let set = rx.try_recv().expect("set");
        assert!(matches!(set, Frame::Set { i, .. } if i == "m1"));
        assert!(handles.get("m1").expect("handle retained").is_finalized());
    }

    #[test]
    fn a_message_without_delta_finalizes_immediately() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = HashMap::new();
        let agent_id = AgentId::new("sp", "ch", "fox");

        translate_output(&agent_id, json!({"messageId": "m1", "type": "cost", "total": 0.02}), &mut handles, &tx);

        let set = rx.try_recv().expect("set emitted directly");
        match set {
            Frame::Set { i, v, .. } => {
                assert_eq!(i, "m1");
                assert_eq!(v["total"], json!(0.02));
            }
            other => panic!("expected Set, got {other:?}"),
        }
        assert!(handles.get("m1").expect("handle retained").is_finalized());
    }

    #[test]
    fn further_output_after_finalize_is_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handles = HashMap::new();
        let agent_id = AgentId::new("sp", "ch", "fox");

        translate_output(&agent_id, json!({"messageId": "m1", "type": "status", "content": "done"}), &mut handles, &tx);
        let _ = rx.try_recv();
        // Same id reappearing (e.g. a duplicate delivery) must not panic
        // or emit past the terminal frame.
        translate_output(&agent_id, json!({"messageId": "m1", "type": "status", "content": "done again"}), &mut handles, &tx);
        assert!(rx.try_recv().is_err());
    }
}
