// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tymbal runtime worker: the engine supervisor (component F) and message
//! handle (component G) that turn `tymbal-server`'s activate/message/
//! suspend commands into spawned engines, and engine output into frames
//! forwarded back over the control channel.

pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod message_handle;
pub mod supervisor;

use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::engine::child::ChildEngineSpawner;
use crate::engine::EngineRegistry;
use crate::supervisor::Supervisor;

/// Run a runtime worker until its control connection's consumer half is
/// dropped (normally: forever, until the process is signaled).
pub async fn run(config: RuntimeConfig) -> anyhow::Result<()> {
    tracing::info!(server_url = %config.server_url, space_id = %config.space_id, "tymbal-runtime starting");

    let mut registry = EngineRegistry::new("claude-sdk");
    registry.register(Arc::new(ChildEngineSpawner::new(
        "claude-sdk",
        config.engine_program.clone(),
        config.engine_args.clone(),
        config.engine_ready_timeout(),
        config.engine_term_grace(),
    )));

    let control = control::spawn(config.clone());
    let supervisor = Supervisor::new(config, registry, control);
    supervisor.run().await;

    Ok(())
}
