// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent lifecycle manager (component E, spec.md §4.5): the per-agent
//! state machine, with linearizable transitions enforced by a per-agent
//! mutex rather than one global lock (spec.md §5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tymbal_protocol::{AgentId, HubMessage};

use crate::hub::ConnectionHub;
use crate::runtime_registry::RuntimeRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Offline,
    Activating,
    Online,
    Busy,
    Suspending,
    Error,
}

/// Options for `activate` (spec.md §4.4 `activate{agentId, systemPrompt,
/// mcpServers?, workspacePath}`).
#[derive(Debug, Clone)]
pub struct ActivateOptions {
    pub runtime_id: String,
    pub system_prompt: String,
    pub mcp_servers: Option<Value>,
    pub workspace_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// `activate` targeted a runtime with no live control connection.
    RuntimeNotConnected,
}

impl std::fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RuntimeNotConnected => f.write_str("runtime not connected"),
        }
    }
}

impl std::error::Error for LifecycleError {}

struct AgentSlot {
    state: AgentState,
    runtime_id: Option<String>,
    activating_since: Option<Instant>,
}

impl Default for AgentSlot {
    fn default() -> Self {
        Self { state: AgentState::Offline, runtime_id: None, activating_since: None }
    }
}

/// Holds one `tokio::sync::Mutex` per agent so transitions on distinct
/// agents proceed fully concurrently while transitions on the same agent
/// are linearizable.
#[derive(Default)]
pub struct LifecycleManager {
    agents: RwLock<HashMap<AgentId, Arc<Mutex<AgentSlot>>>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot_for(&self, agent_id: &AgentId) -> Arc<Mutex<AgentSlot>> {
        if let Some(slot) = self.agents.read().await.get(agent_id) {
            return Arc::clone(slot);
        }
        let mut agents = self.agents.write().await;
        Arc::clone(agents.entry(agent_id.clone()).or_default())
    }

    pub async fn state(&self, agent_id: &AgentId) -> AgentState {
        self.slot_for(agent_id).await.lock().await.state
    }

    /// The runtime an agent is currently bound to, if any.
    pub async fn runtime_id(&self, agent_id: &AgentId) -> Option<String> {
        self.slot_for(agent_id).await.lock().await.runtime_id.clone()
    }

    /// `offline → activating` on an activate request; no-op (idempotent)
    /// if already activating/online/busy. Fails fast without mutating
    /// state if the target runtime has no live control connection.
    pub async fn activate(
        &self,
        agent_id: &AgentId,
        opts: ActivateOptions,
        hub: &ConnectionHub,
    ) -> Result<AgentState, LifecycleError> {
        let slot = self.slot_for(agent_id).await;
        let mut guard = slot.lock().await;

        if matches!(guard.state, AgentState::Activating | AgentState::Online | AgentState::Busy) {
            return Ok(guard.state);
        }

        let Some(connection_id) = hub.runtime_connection_id(&opts.runtime_id).await else {
            return Err(LifecycleError::RuntimeNotConnected);
        };

        let msg = HubMessage::Activate {
            agent_id: agent_id.clone(),
            system_prompt: opts.system_prompt,
            mcp_servers: opts.mcp_servers,
            workspace_path: opts.workspace_path,
        };
        let line = serde_json::to_string(&msg).unwrap_or_default();
        hub.send(&connection_id, &line).await;

        tracing::info!(%agent_id, runtime_id = %opts.runtime_id, "agent_activating");
        guard.state = AgentState::Activating;
        guard.runtime_id = Some(opts.runtime_id);
        guard.activating_since = Some(Instant::now());
        Ok(guard.state)
    }

    /// `activating → online` on `agent_checkin`. Unexpected checkins in
    /// `online`/`busy` leave state unchanged.
    pub async fn on_checkin(&self, agent_id: &AgentId) -> AgentState {
        let slot = self.slot_for(agent_id).await;
        let mut guard = slot.lock().await;
        if guard.state == AgentState::Activating {
            guard.state = AgentState::Online;
            guard.activating_since = None;
        }
        guard.state
    }

    /// `online ↔ busy` on set frames: an idle-typed set moves to online,
    /// any other moves to busy. Only effective from `online`/`busy`.
    pub async fn on_set_frame(&self, agent_id: &AgentId, value: &Value) -> AgentState {
        let is_idle = value.get("type").and_then(|t| t.as_str()) == Some("idle");
        let slot = self.slot_for(agent_id).await;
        let mut guard = slot.lock().await;
        if matches!(guard.state, AgentState::Online | AgentState::Busy) {
            guard.state = if is_idle { AgentState::Online } else { AgentState::Busy };
        }
        guard.state
    }

    /// Idempotent: a no-op (no command sent) if the agent is already
    /// offline. Otherwise asks the bound runtime to suspend, then
    /// unconditionally clears the binding and moves to `offline`.
    pub async fn suspend(&self, agent_id: &AgentId, reason: Option<&str>, hub: &ConnectionHub) -> AgentState {
        let slot = self.slot_for(agent_id).await;
        let mut guard = slot.lock().await;

        if guard.state == AgentState::Offline {
            return guard.state;
        }

        if let Some(runtime_id) = &guard.runtime_id {
            if let Some(connection_id) = hub.runtime_connection_id(runtime_id).await {
                let msg = HubMessage::Suspend { agent_id: agent_id.clone(), reason: reason.map(str::to_owned) };
                let line = serde_json::to_string(&msg).unwrap_or_default();
                hub.send(&connection_id, &line).await;
            }
        }

        tracing::info!(%agent_id, reason = reason.unwrap_or(""), "agent_offline");
        guard.state = AgentState::Offline;
        guard.runtime_id = None;
        guard.activating_since = None;
        guard.state
    }

    /// Unconditional transition to `offline`, used on runtime disconnect
    /// where there is no live connection to notify.
    pub async fn mark_offline(&self, agent_id: &AgentId) {
        let slot = self.slot_for(agent_id).await;
        let mut guard = slot.lock().await;
        guard.state = AgentState::Offline;
        guard.runtime_id = None;
        guard.activating_since = None;
    }

    /// Unconditional transition to `error` (spec.md §4.5 "any → error on
    /// activation timeout or engine error", §7 "Engine" error kind). Called
    /// when a runtime forwards an `error`-typed frame for this agent.
    pub async fn mark_error(&self, agent_id: &AgentId) -> AgentState {
        let slot = self.slot_for(agent_id).await;
        let mut guard = slot.lock().await;
        guard.state = AgentState::Error;
        guard.activating_since = None;
        guard.state
    }

    /// Move every agent stuck in `activating` past `timeout` to `error`;
    /// returns the ids that timed out so the caller can broadcast an
    /// error frame for each (spec.md §5 "Activation" timeout).
    pub async fn sweep_timeouts(&self, timeout: Duration) -> Vec<AgentId> {
        let agents = self.agents.read().await;
        let mut timed_out = Vec::new();
        for (agent_id, slot) in agents.iter() {
            let mut guard = slot.lock().await;
            if guard.state == AgentState::Activating {
                if let Some(since) = guard.activating_since {
                    if since.elapsed() >= timeout {
                        guard.state = AgentState::Error;
                        guard.activating_since = None;
                        timed_out.push(agent_id.clone());
                    }
                }
            }
        }
        timed_out
    }

    /// Suspend every agent not already offline (graceful shutdown).
    pub async fn suspend_all(&self, hub: &ConnectionHub, _runtimes: &RuntimeRegistry) {
        let ids: Vec<AgentId> = self.agents.read().await.keys().cloned().collect();
        for agent_id in ids {
            self.suspend(&agent_id, Some("server shutting down"), hub).await;
        }
    }
}
