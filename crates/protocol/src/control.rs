// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The runtime control protocol (spec.md §4.4, §6): the typed message set a
//! runtime and the server exchange over their control connection. Every
//! message is one JSON object per line, discriminated by a `type` field.
//! Protocol version `"1.0"` is advertised on the first server response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent_id::AgentId;
use crate::frame::Frame;

/// Advertised in the first `runtime_connected` reply.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Messages a runtime sends to the server over its control connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeMessage {
    /// First message on a new control connection. Registers or
    /// re-registers the runtime.
    RuntimeReady {
        #[serde(rename = "runtimeId")]
        runtime_id: String,
        #[serde(rename = "spaceId")]
        space_id: String,
        name: String,
        #[serde(rename = "machineInfo", skip_serializing_if = "Option::is_none", default)]
        machine_info: Option<Value>,
    },
    /// An engine has come online for `agentId`.
    AgentCheckin {
        #[serde(rename = "agentId")]
        agent_id: AgentId,
    },
    /// Periodic liveness signal for an already-checked-in agent.
    AgentHeartbeat {
        #[serde(rename = "agentId")]
        agent_id: AgentId,
    },
    /// A frame produced by `agentId`'s engine, forwarded for broadcast and
    /// (if a *set*) persistence.
    Frame {
        #[serde(rename = "agentId")]
        agent_id: AgentId,
        frame: Frame,
    },
    /// Reply to a server `ping`.
    Pong { timestamp: String },
}

/// Messages the server sends to a runtime over its control connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    /// Acknowledges a `runtime_ready`, naming the effective runtime id.
    RuntimeConnected {
        #[serde(rename = "runtimeId")]
        runtime_id: String,
        #[serde(rename = "protocolVersion")]
        protocol_version: String,
    },
    /// Instructs the runtime to start an engine for `agentId`.
    Activate {
        #[serde(rename = "agentId")]
        agent_id: AgentId,
        #[serde(rename = "systemPrompt")]
        system_prompt: String,
        #[serde(rename = "mcpServers", skip_serializing_if = "Option::is_none", default)]
        mcp_servers: Option<Value>,
        #[serde(rename = "workspacePath")]
        workspace_path: String,
    },
    /// Delivers a turn to an already-active agent.
    Message {
        #[serde(rename = "agentId")]
        agent_id: AgentId,
        #[serde(rename = "messageId")]
        message_id: String,
        content: Value,
        sender: String,
        #[serde(rename = "systemPrompt", skip_serializing_if = "Option::is_none", default)]
        system_prompt: Option<String>,
        #[serde(rename = "mcpServers", skip_serializing_if = "Option::is_none", default)]
        mcp_servers: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        environment: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        props: Option<Value>,
    },
    /// Asks the runtime to tear down `agentId`'s engine.
    Suspend {
        #[serde(rename = "agentId")]
        agent_id: AgentId,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        reason: Option<String>,
    },
    /// Liveness probe; the runtime must reply with `pong`.
    Ping { timestamp: String },
    /// Control-channel rejection, e.g. `NOT_REGISTERED` (spec.md §6).
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        message: Option<String>,
    },
}
