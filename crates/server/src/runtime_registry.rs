// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime registry: the durable `(runtimeId, spaceId, name)` record
//! behind `runtime_ready` registration and reclaim (spec.md §4.4, §3
//! "Runtime").

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone)]
struct RuntimeRecordState {
    id: String,
    space_id: String,
    name: String,
    status: RuntimeStatus,
    connection_id: Option<String>,
    last_seen_at: Instant,
}

/// Read-only view for admin/diagnostic surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSnapshot {
    pub id: String,
    pub space_id: String,
    pub name: String,
    pub status: RuntimeStatus,
    pub last_seen_secs_ago: u64,
}

/// Tracks every registered runtime. A runtime belongs to exactly one
/// space (spec.md §3 invariant).
#[derive(Default)]
pub struct RuntimeRegistry {
    by_id: RwLock<HashMap<String, RuntimeRecordState>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or re-register a runtime on `runtime_ready`. Looks up by
    /// id first; if absent, reclaims a prior record by `(spaceId, name)`;
    /// otherwise creates one. Returns the effective runtime id, which may
    /// differ from `runtime_id` when an existing record was reclaimed.
    pub async fn register_or_reclaim(
        &self,
        runtime_id: &str,
        space_id: &str,
        name: &str,
        connection_id: &str,
    ) -> String {
        let mut by_id = self.by_id.write().await;

        if let Some(record) = by_id.get_mut(runtime_id) {
            record.status = RuntimeStatus::Online;
            record.connection_id = Some(connection_id.to_owned());
            record.last_seen_at = Instant::now();
            return record.id.clone();
        }

        let reclaimed_id = by_id
            .values()
            .find(|r| r.space_id == space_id && r.name == name)
            .map(|r| r.id.clone());

        if let Some(existing_id) = reclaimed_id {
            if let Some(record) = by_id.get_mut(&existing_id) {
                record.status = RuntimeStatus::Online;
                record.connection_id = Some(connection_id.to_owned());
                record.last_seen_at = Instant::now();
                return record.id.clone();
            }
        }

        by_id.insert(
            runtime_id.to_owned(),
            RuntimeRecordState {
                id: runtime_id.to_owned(),
                space_id: space_id.to_owned(),
                name: name.to_owned(),
                status: RuntimeStatus::Online,
                connection_id: Some(connection_id.to_owned()),
                last_seen_at: Instant::now(),
            },
        );
        runtime_id.to_owned()
    }

    /// Refresh a runtime's `lastSeenAt` (on `agent_heartbeat` / `frame`).
    pub async fn refresh_heartbeat(&self, runtime_id: &str) {
        if let Some(record) = self.by_id.write().await.get_mut(runtime_id) {
            record.last_seen_at = Instant::now();
        }
    }

    pub async fn status(&self, runtime_id: &str) -> Option<RuntimeStatus> {
        self.by_id.read().await.get(runtime_id).map(|r| r.status)
    }

    /// The space a runtime belongs to (a runtime serves exactly one space).
    pub async fn space_id(&self, runtime_id: &str) -> Option<String> {
        self.by_id.read().await.get(runtime_id).map(|r| r.space_id.clone())
    }

    /// Mark offline whichever runtime owns `connection_id`, clearing its
    /// binding. Returns its id so the caller can offline its bound agents.
    pub async fn mark_offline_by_connection(&self, connection_id: &str) -> Option<String> {
        let mut by_id = self.by_id.write().await;
        let record = by_id.values_mut().find(|r| r.connection_id.as_deref() == Some(connection_id))?;
        record.status = RuntimeStatus::Offline;
        record.connection_id = None;
        Some(record.id.clone())
    }

    pub async fn list(&self) -> Vec<RuntimeSnapshot> {
        let by_id = self.by_id.read().await;
        let now = Instant::now();
        by_id
            .values()
            .map(|r| RuntimeSnapshot {
                id: r.id.clone(),
                space_id: r.space_id.clone(),
                name: r.name.clone(),
                status: r.status,
                last_seen_secs_ago: now.duration_since(r.last_seen_at).as_secs(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_registration_creates_a_record() {
        let registry = RuntimeRegistry::new();
        let id = registry.register_or_reclaim("rt1", "sp1", "worker-a", "conn1").await;
        assert_eq!(id, "rt1");
        assert_eq!(registry.status("rt1").await, Some(RuntimeStatus::Online));
    }

    #[tokio::test]
    async fn re_registration_by_id_refreshes_the_connection() {
        let registry = RuntimeRegistry::new();
        registry.register_or_reclaim("rt1", "sp1", "worker-a", "conn1").await;
        registry.mark_offline_by_connection("conn1").await;
        let id = registry.register_or_reclaim("rt1", "sp1", "worker-a", "conn2").await;
        assert_eq!(id, "rt1");
        assert_eq!(registry.status("rt1").await, Some(RuntimeStatus::Online));
    }

    #[tokio::test]
    async fn unknown_id_reclaims_by_space_and_name() {
        let registry = RuntimeRegistry::new();
        registry.register_or_reclaim("rt-old", "sp1", "worker-a", "conn1").await;
        registry.mark_offline_by_connection("conn1").await;

        // The runtime lost its persisted id and generated a new one, but
        // its (space, name) matches a prior record: reclaim rt-old.
        let id = registry.register_or_reclaim("rt-new", "sp1", "worker-a", "conn2").await;
        assert_eq!(id, "rt-old");
    }

    #[tokio::test]
    async fn disconnect_marks_offline_and_clears_binding() {
        let registry = RuntimeRegistry::new();
        registry.register_or_reclaim("rt1", "sp1", "worker-a", "conn1").await;
        let offlined = registry.mark_offline_by_connection("conn1").await;
        assert_eq!(offlined.as_deref(), Some("rt1"));
        assert_eq!(registry.status("rt1").await, Some(RuntimeStatus::Offline));
    }
}
