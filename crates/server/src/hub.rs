// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection hub (component C, spec.md §4.3): a durable record plus a
//! platform-specific send capability for every live session, shared by
//! client (UI) and runtime (control) connections.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::sync::RwLock;

/// The pseudo-channel for a connection that authenticated but has not yet
/// subscribed to a real channel. Never receives broadcasts.
pub const PENDING_CHANNEL: &str = "__pending__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionRole {
    Client,
    Runtime,
}

/// Connection-role-specific bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMeta {
    pub agent_callsign: Option<String>,
    pub container_id: Option<String>,
    pub runtime_id: Option<String>,
}

/// The capability to deliver a line to a connected peer. Two
/// implementations: a direct socket write, and a managed post to an
/// external connection store for serverless deployments (spec.md §4.3).
/// Both report `false` for a gone peer.
pub trait SendHandle: Send + Sync {
    fn send(&self, line: String) -> BoxFuture<'_, bool>;
}

/// Delivers by pushing onto an in-process channel that feeds the
/// connection's socket-writer task.
pub struct DirectSender {
    tx: tokio::sync::mpsc::UnboundedSender<String>,
}

impl DirectSender {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl SendHandle for DirectSender {
    fn send(&self, line: String) -> BoxFuture<'_, bool> {
        let delivered = self.tx.send(line).is_ok();
        Box::pin(async move { delivered })
    }
}

/// Delivers by POSTing to an external connection store that fans out to
/// the peer from whichever process currently owns its socket.
pub struct ManagedStoreSender {
    client: reqwest::Client,
    post_url: String,
}

impl ManagedStoreSender {
    pub fn new(client: reqwest::Client, post_url: String) -> Self {
        Self { client, post_url }
    }
}

impl SendHandle for ManagedStoreSender {
    fn send(&self, line: String) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.client.post(&self.post_url).body(line).send().await.is_ok_and(|r| r.status().is_success())
        })
    }
}

struct ConnectionRecord {
    connection_id: String,
    channel_id: String,
    role: ConnectionRole,
    meta: ConnectionMeta,
    connected_at: Instant,
    handle: Arc<dyn SendHandle>,
}

/// Read-only view of a connection record for diagnostics/admin endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub connection_id: String,
    pub channel_id: String,
    pub role: ConnectionRole,
    pub agent_callsign: Option<String>,
    pub container_id: Option<String>,
    pub runtime_id: Option<String>,
    pub connected_secs_ago: u64,
}

/// Maintains, for each live session, a durable record and its send
/// capability. Operations never panic on an unknown connection id; they
/// are no-ops, matching the self-healing invariant (spec.md §9).
#[derive(Default)]
pub struct ConnectionHub {
    records: RwLock<HashMap<String, ConnectionRecord>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a new connection record and begin observing inbound lines.
    pub async fn add(
        &self,
        connection_id: impl Into<String>,
        channel_id: impl Into<String>,
        role: ConnectionRole,
        meta: ConnectionMeta,
        handle: Arc<dyn SendHandle>,
    ) {
        let connection_id = connection_id.into();
        let record = ConnectionRecord {
            connection_id: connection_id.clone(),
            channel_id: channel_id.into(),
            role,
            meta,
            connected_at: Instant::now(),
            handle,
        };
        self.records.write().await.insert(connection_id, record);
    }

    /// Atomically update a record's channel. Subsequent broadcasts to the
    /// new channel include it.
    pub async fn switch(&self, connection_id: &str, new_channel_id: impl Into<String>) {
        if let Some(record) = self.records.write().await.get_mut(connection_id) {
            record.channel_id = new_channel_id.into();
        }
    }

    /// Bind a runtime connection to its effective runtime id once
    /// registration completes.
    pub async fn bind_runtime(&self, connection_id: &str, runtime_id: impl Into<String>) {
        if let Some(record) = self.records.write().await.get_mut(connection_id) {
            record.meta.runtime_id = Some(runtime_id.into());
        }
    }

    /// Deliver `line` to every record subscribed to `channel_id`. A `false`
    /// send result removes that record before the next broadcast begins.
    pub async fn broadcast(&self, channel_id: &str, line: &str) {
        let targets: Vec<(String, Arc<dyn SendHandle>)> = {
            let records = self.records.read().await;
            records
                .values()
                .filter(|r| r.channel_id == channel_id)
                .map(|r| (r.connection_id.clone(), Arc::clone(&r.handle)))
                .collect()
        };

        let mut stale = Vec::new();
        for (connection_id, handle) in targets {
            if !handle.send(line.to_owned()).await {
                stale.push(connection_id);
            }
        }

        if !stale.is_empty() {
            let mut records = self.records.write().await;
            for connection_id in stale {
                records.remove(&connection_id);
            }
        }
    }

    /// Direct delivery to a single connection. Stale ⇒ remove.
    pub async fn send(&self, connection_id: &str, line: &str) -> bool {
        let handle = {
            let records = self.records.read().await;
            records.get(connection_id).map(|r| Arc::clone(&r.handle))
        };
        let Some(handle) = handle else { return false };

        let delivered = handle.send(line.to_owned()).await;
        if !delivered {
            self.records.write().await.remove(connection_id);
        }
        delivered
    }

    /// Remove a record and release its send capability.
    pub async fn close(&self, connection_id: &str) {
        self.records.write().await.remove(connection_id);
    }

    /// Remove every record (graceful shutdown).
    pub async fn close_all(&self) {
        self.records.write().await.clear();
    }

    /// Find the connection id bound to a runtime, if it is online.
    pub async fn runtime_connection_id(&self, runtime_id: &str) -> Option<String> {
        let records = self.records.read().await;
        records
            .values()
            .find(|r| r.role == ConnectionRole::Runtime && r.meta.runtime_id.as_deref() == Some(runtime_id))
            .map(|r| r.connection_id.clone())
    }

    /// Snapshot every connection currently subscribed to `channel_id`.
    pub async fn connections_in_channel(&self, channel_id: &str) -> Vec<ConnectionSnapshot> {
        let records = self.records.read().await;
        records
            .values()
            .filter(|r| r.channel_id == channel_id)
            .map(|r| ConnectionSnapshot {
                connection_id: r.connection_id.clone(),
                channel_id: r.channel_id.clone(),
                role: r.role,
                agent_callsign: r.meta.agent_callsign.clone(),
                container_id: r.meta.container_id.clone(),
                runtime_id: r.meta.runtime_id.clone(),
                connected_secs_ago: r.connected_at.elapsed().as_secs(),
            })
            .collect()
    }
}
