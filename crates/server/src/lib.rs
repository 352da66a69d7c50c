// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tymbal server: the authoritative hub for a space's channels, runtimes,
//! and agent roster. Authenticates runtime control connections, routes
//! user and agent messages to their targets, persists frames, and drives
//! the per-agent lifecycle state machine.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod hub;
pub mod lifecycle;
pub mod roster;
pub mod runtime_registry;
pub mod storage;
pub mod time;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::BootstrapBroker;
use crate::config::ServerConfig;
use crate::hub::ConnectionHub;
use crate::lifecycle::LifecycleManager;
use crate::roster::RosterStore;
use crate::runtime_registry::RuntimeRegistry;
use crate::storage::{InMemoryStorage, Storage};
use crate::transport::build_router;

/// Everything a request handler needs: the hub, the runtime registry, the
/// lifecycle manager, the roster store, the durable store, and the config
/// they were all built from.
pub struct AppState {
    pub config: ServerConfig,
    pub hub: ConnectionHub,
    pub runtimes: RuntimeRegistry,
    pub roster: RosterStore,
    pub lifecycle: LifecycleManager,
    pub storage: Arc<dyn Storage>,
    pub bootstrap: BootstrapBroker,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            hub: ConnectionHub::new(),
            runtimes: RuntimeRegistry::new(),
            roster: RosterStore::new(),
            lifecycle: LifecycleManager::new(),
            storage: Arc::new(InMemoryStorage::new()),
            bootstrap: BootstrapBroker::new(),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Run the server until shutdown.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config));

    tracing::info!(%addr, "tymbal-server listening");

    spawn_activation_sweeper(Arc::clone(&state));

    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal(state)).await?;

    Ok(())
}

/// Spawn a single background task that periodically moves agents stuck in
/// `activating` past the configured checkin timeout to `error`, broadcasting
/// an `agent_state`/`error` set-frame to each affected channel (spec.md §5
/// "Activation", §4.5 "any → error on activation timeout").
fn spawn_activation_sweeper(state: Arc<AppState>) {
    let interval = state.config.activation_sweep_interval();
    let timeout = state.config.checkin_timeout();

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            for agent_id in state.lifecycle.sweep_timeouts(timeout).await {
                tracing::warn!(%agent_id, "agent activation timed out, moving to error");
                let frame = tymbal_protocol::Frame::Set {
                    i: tymbal_protocol::new_id(),
                    t: crate::time::iso8601_now(),
                    v: serde_json::json!({"type": "agent_state", "state": "error"}),
                };
                let line = tymbal_protocol::serialize(&frame);
                state.hub.broadcast(&agent_id.channel_id, &line).await;
            }
        }
    });
}

/// Graceful shutdown: close every hub connection and suspend every online
/// agent before the listener stops accepting (spec.md §5 "Graceful
/// shutdown").
async fn shutdown_signal(state: Arc<AppState>) {
    tokio::select! {
        _ = state.shutdown.clone().cancelled() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
    tracing::info!("shutting down: closing connections and suspending agents");
    state.hub.close_all().await;
    state.lifecycle.suspend_all(&state.hub, &state.runtimes).await;
}
