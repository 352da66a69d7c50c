// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable storage interface (spec.md §6) and the *set*-frame persistence
//! policy (spec.md §4.4). `Storage` is a capability seam: the in-memory
//! implementation here is sufficient for a single-process deployment;
//! swapping in a real database means implementing this trait, nothing
//! else in the hub changes.

use std::collections::HashMap;
use std::sync::Mutex;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tymbal_protocol::{AgentId, Frame};

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: String,
    pub space_id: String,
    pub channel_id: String,
    pub sender: String,
    pub sender_type: String,
    pub message_type: String,
    pub content: Value,
    pub is_complete: bool,
    pub metadata: Option<Value>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostRecord {
    pub space_id: String,
    pub channel_id: String,
    pub callsign: String,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub num_turns: u64,
    pub usage: Value,
    pub model_usage: Value,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeRecord {
    pub id: String,
    pub space_id: String,
    pub name: String,
    pub kind: String,
    pub status: String,
    pub config: Value,
    pub last_seen_at: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionRecord {
    pub id: String,
    pub channel_id: String,
    pub role: String,
    pub agent_callsign: Option<String>,
    pub container_id: Option<String>,
    pub runtime_id: Option<String>,
    pub connected_at: String,
}

/// Filters for a `sync` request against the message log (spec.md §4.1
/// `SyncRequest`).
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub since: Option<String>,
    pub before: Option<String>,
    pub limit: u64,
}

/// The durable record store behind Storage trait (spec.md §6 tables).
/// Every write is best-effort from the hub's perspective: a write failure
/// is logged and broadcast still proceeds (spec.md §7 "Integrity").
pub trait Storage: Send + Sync {
    fn write_message(&self, record: MessageRecord) -> BoxFuture<'_, anyhow::Result<()>>;
    fn write_cost(&self, record: CostRecord) -> BoxFuture<'_, anyhow::Result<()>>;
    fn upsert_runtime(&self, record: RuntimeRecord) -> BoxFuture<'_, anyhow::Result<()>>;
    fn upsert_connection(&self, record: ConnectionRecord) -> BoxFuture<'_, anyhow::Result<()>>;
    fn remove_connection(&self, id: &str) -> BoxFuture<'_, anyhow::Result<()>>;
    fn list_messages(&self, channel_id: &str, query: MessageQuery) -> BoxFuture<'_, anyhow::Result<Vec<MessageRecord>>>;
}

/// In-process `Storage` for a single server instance. Not durable across
/// restarts; a real deployment backs this trait with a database.
#[derive(Default)]
pub struct InMemoryStorage {
    messages: Mutex<HashMap<String, Vec<MessageRecord>>>,
    costs: Mutex<Vec<CostRecord>>,
    runtimes: Mutex<HashMap<String, RuntimeRecord>>,
    connections: Mutex<HashMap<String, ConnectionRecord>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for InMemoryStorage {
    fn write_message(&self, record: MessageRecord) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            let mut messages = self.messages.lock().unwrap_or_else(|p| p.into_inner());
            messages.entry(record.channel_id.clone()).or_default().push(record);
            Ok(())
        })
    }

    fn write_cost(&self, record: CostRecord) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.costs.lock().unwrap_or_else(|p| p.into_inner()).push(record);
            Ok(())
        })
    }

    fn upsert_runtime(&self, record: RuntimeRecord) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.runtimes.lock().unwrap_or_else(|p| p.into_inner()).insert(record.id.clone(), record);
            Ok(())
        })
    }

    fn upsert_connection(&self, record: ConnectionRecord) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.connections.lock().unwrap_or_else(|p| p.into_inner()).insert(record.id.clone(), record);
            Ok(())
        })
    }

    fn remove_connection(&self, id: &str) -> BoxFuture<'_, anyhow::Result<()>> {
        let id = id.to_owned();
        Box::pin(async move {
            self.connections.lock().unwrap_or_else(|p| p.into_inner()).remove(&id);
            Ok(())
        })
    }

    fn list_messages(&self, channel_id: &str, query: MessageQuery) -> BoxFuture<'_, anyhow::Result<Vec<MessageRecord>>> {
        let channel_id = channel_id.to_owned();
        Box::pin(async move {
            let messages = self.messages.lock().unwrap_or_else(|p| p.into_inner());
            let mut out: Vec<MessageRecord> = messages.get(&channel_id).cloned().unwrap_or_default();
            if let Some(since) = &query.since {
                out.retain(|m| &m.id > since);
            }
            if let Some(before) = &query.before {
                out.retain(|m| &m.id < before);
            }
            if query.limit > 0 && out.len() > query.limit as usize {
                let start = out.len() - query.limit as usize;
                out = out.split_off(start);
            }
            Ok(out)
        })
    }
}

/// Apply the *set*-frame persistence policy (spec.md §4.4): cost frames
/// become a cost record and no message; `tool_call`/`tool_result` persist
/// `v` verbatim; everything else persists `v.content ?? v`. The message id
/// equals the frame's `i`; `isComplete` is always `true`.
pub async fn persist_set_frame(
    storage: &dyn Storage,
    agent_id: &AgentId,
    sender: &str,
    sender_type: &str,
    created_at: &str,
    frame: &Frame,
) -> anyhow::Result<()> {
    let Frame::Set { i, v, .. } = frame else {
        return Ok(());
    };

    let message_type = v.get("type").and_then(|t| t.as_str()).unwrap_or("status").to_owned();

    if message_type == "cost" {
        let record = CostRecord {
            space_id: agent_id.space_id.clone(),
            channel_id: agent_id.channel_id.clone(),
            callsign: agent_id.callsign.clone(),
            cost_usd: v.get("costUsd").and_then(|x| x.as_f64()).unwrap_or(0.0),
            duration_ms: v.get("durationMs").and_then(|x| x.as_u64()).unwrap_or(0),
            num_turns: v.get("numTurns").and_then(|x| x.as_u64()).unwrap_or(0),
            usage: v.get("usage").cloned().unwrap_or(Value::Null),
            model_usage: v.get("modelUsage").cloned().unwrap_or(Value::Null),
            created_at: created_at.to_owned(),
        };
        return storage.write_cost(record).await;
    }

    let content = if matches!(message_type.as_str(), "tool_call" | "tool_result") {
        v.clone()
    } else {
        v.get("content").cloned().unwrap_or_else(|| v.clone())
    };

    let record = MessageRecord {
        id: i.clone(),
        space_id: agent_id.space_id.clone(),
        channel_id: agent_id.channel_id.clone(),
        sender: sender.to_owned(),
        sender_type: sender_type.to_owned(),
        message_type,
        content,
        is_complete: true,
        metadata: None,
        created_at: created_at.to_owned(),
    };
    storage.write_message(record).await
}
