// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-channel roster: which agents and users belong to a channel, who
//! leads it, and each agent's last-heartbeat / runtime binding (spec.md
//! §3 "Roster entry").

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::RwLock;
use tymbal_protocol::RosterView;

/// A single `(agent callsign, channel)` entry.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub callsign: String,
    pub agent_type: String,
    pub status: String,
    pub last_heartbeat: Option<Instant>,
    pub runtime_id: Option<String>,
}

impl RosterEntry {
    fn new(callsign: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            callsign: callsign.into(),
            agent_type: agent_type.into(),
            status: "offline".to_owned(),
            last_heartbeat: None,
            runtime_id: None,
        }
    }
}

#[derive(Debug, Default)]
struct ChannelRoster {
    leader: Option<String>,
    agents: HashMap<String, RosterEntry>,
    users: Vec<String>,
}

/// Owns every channel's roster. Safe for concurrent access across
/// channels; per-channel mutation takes the whole-map write lock, which
/// is acceptable since rosters are small and writes infrequent relative
/// to the frame stream they gate.
#[derive(Default)]
pub struct RosterStore {
    channels: RwLock<HashMap<String, ChannelRoster>>,
}

impl RosterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel's leader callsign, creating the channel roster
    /// if it does not exist yet.
    pub async fn set_leader(&self, channel_id: &str, leader: impl Into<String>) {
        let mut channels = self.channels.write().await;
        channels.entry(channel_id.to_owned()).or_default().leader = Some(leader.into());
    }

    /// Add or update an agent's roster entry for a channel.
    pub async fn upsert_agent(&self, channel_id: &str, callsign: &str, agent_type: &str) {
        let mut channels = self.channels.write().await;
        let roster = channels.entry(channel_id.to_owned()).or_default();
        roster
            .agents
            .entry(callsign.to_owned())
            .or_insert_with(|| RosterEntry::new(callsign, agent_type));
    }

    /// Record a connected user's presence in a channel (for mention
    /// resolution against `users`).
    pub async fn add_user(&self, channel_id: &str, user: impl Into<String>) {
        let user = user.into();
        let mut channels = self.channels.write().await;
        let roster = channels.entry(channel_id.to_owned()).or_default();
        if !roster.users.contains(&user) {
            roster.users.push(user);
        }
    }

    pub async fn remove_user(&self, channel_id: &str, user: &str) {
        let mut channels = self.channels.write().await;
        if let Some(roster) = channels.get_mut(channel_id) {
            roster.users.retain(|u| u != user);
        }
    }

    /// Refresh an agent's heartbeat timestamp and status.
    pub async fn record_heartbeat(&self, channel_id: &str, callsign: &str) {
        let mut channels = self.channels.write().await;
        if let Some(entry) = channels.entry(channel_id.to_owned()).or_default().agents.get_mut(callsign) {
            entry.last_heartbeat = Some(Instant::now());
        }
    }

    pub async fn set_status(&self, channel_id: &str, callsign: &str, status: impl Into<String>) {
        let mut channels = self.channels.write().await;
        if let Some(entry) = channels.entry(channel_id.to_owned()).or_default().agents.get_mut(callsign) {
            entry.status = status.into();
        }
    }

    pub async fn bind_runtime(&self, channel_id: &str, callsign: &str, runtime_id: &str) {
        let mut channels = self.channels.write().await;
        if let Some(entry) = channels.entry(channel_id.to_owned()).or_default().agents.get_mut(callsign) {
            entry.runtime_id = Some(runtime_id.to_owned());
        }
    }

    pub async fn clear_runtime(&self, channel_id: &str, callsign: &str) {
        let mut channels = self.channels.write().await;
        if let Some(entry) = channels.entry(channel_id.to_owned()).or_default().agents.get_mut(callsign) {
            entry.runtime_id = None;
        }
    }

    /// Every `(channel_id, callsign)` currently bound to `runtime_id`, used
    /// to drive disconnect handling (spec.md §4.4).
    pub async fn agents_bound_to_runtime(&self, runtime_id: &str) -> Vec<(String, String)> {
        let channels = self.channels.read().await;
        let mut out = Vec::new();
        for (channel_id, roster) in channels.iter() {
            for entry in roster.agents.values() {
                if entry.runtime_id.as_deref() == Some(runtime_id) {
                    out.push((channel_id.clone(), entry.callsign.clone()));
                }
            }
        }
        out
    }

    /// Build the `{agents, users, leader}` view the mention router needs.
    pub async fn roster_view(&self, channel_id: &str) -> RosterView {
        let channels = self.channels.read().await;
        match channels.get(channel_id) {
            Some(roster) => RosterView {
                agents: roster.agents.keys().cloned().collect(),
                users: roster.users.clone(),
                leader: roster.leader.clone(),
            },
            None => RosterView::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roster_view_reflects_agents_users_and_leader() {
        let store = RosterStore::new();
        store.set_leader("ch1", "fox").await;
        store.upsert_agent("ch1", "fox", "claude").await;
        store.upsert_agent("ch1", "owl", "claude").await;
        store.add_user("ch1", "alice").await;

        let view = store.roster_view("ch1").await;
        assert_eq!(view.leader.as_deref(), Some("fox"));
        assert_eq!(view.users, vec!["alice".to_owned()]);
        let mut agents = view.agents;
        agents.sort();
        assert_eq!(agents, vec!["fox".to_owned(), "owl".to_owned()]);
    }

    #[tokio::test]
    async fn agents_bound_to_runtime_finds_every_channel() {
        let store = RosterStore::new();
        store.upsert_agent("ch1", "fox", "claude").await;
        store.upsert_agent("ch2", "owl", "claude").await;
        store.bind_runtime("ch1", "fox", "rt1").await;
        store.bind_runtime("ch2", "owl", "rt1").await;

        let mut bound = store.agents_bound_to_runtime("rt1").await;
        bound.sort();
        assert_eq!(bound, vec![("ch1".to_owned(), "fox".to_owned()), ("ch2".to_owned(), "owl".to_owned())]);
    }

    #[tokio::test]
    async fn unknown_channel_yields_empty_roster_view() {
        let store = RosterStore::new();
        let view = store.roster_view("missing").await;
        assert!(view.agents.is_empty());
        assert!(view.users.is_empty());
        assert!(view.leader.is_none());
    }
}
