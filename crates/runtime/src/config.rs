// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for a `tymbal-runtime` worker process.
#[derive(Debug, Clone, clap::Args)]
pub struct RuntimeConfig {
    /// WebSocket URL of the server's runtime control endpoint, e.g.
    /// `ws://localhost:9900/ws/runtime`.
    #[arg(long, env = "TYMBAL_SERVER_URL")]
    pub server_url: String,

    /// Server credential presented on connect (spec.md §6
    /// "Connection-time authentication").
    #[arg(long, env = "TYMBAL_RUNTIME_TOKEN")]
    pub token: Option<String>,

    /// Stable id for this runtime. Generated once and persisted by the
    /// caller; omit on first boot to let the server assign one.
    #[arg(long, env = "TYMBAL_RUNTIME_ID")]
    pub runtime_id: Option<String>,

    /// Space this runtime belongs to.
    #[arg(long, env = "TYMBAL_SPACE_ID")]
    pub space_id: String,

    /// Display name advertised in `runtime_ready`.
    #[arg(long, env = "TYMBAL_RUNTIME_NAME")]
    pub name: String,

    /// Default workspace path handed to engines that don't override it.
    #[arg(long, default_value = "/work", env = "TYMBAL_WORKSPACE_PATH")]
    pub workspace_path: String,

    /// Which engine id to prefer when `activate` does not name one.
    #[arg(long, default_value = "claude-sdk", env = "TYMBAL_DEFAULT_ENGINE")]
    pub default_engine: String,

    /// Child-process engine binary to spawn for `default_engine`.
    #[arg(long, default_value = "claude-agent-sdk", env = "TYMBAL_ENGINE_PROGRAM")]
    pub engine_program: String,

    /// Arguments passed to `engine_program` on spawn.
    #[arg(long, env = "TYMBAL_ENGINE_ARGS", value_delimiter = ',')]
    pub engine_args: Vec<String>,

    /// How long to wait for a child engine's `init` message before
    /// terminating it and surfacing a spawn error (spec.md §5).
    #[arg(long, default_value_t = 30_000, env = "TYMBAL_ENGINE_READY_TIMEOUT_MS")]
    pub engine_ready_timeout_ms: u64,

    /// Grace period between SIGTERM and SIGKILL when terminating a child
    /// engine (spec.md §4.6 "Termination sends SIGTERM, waits a bounded
    /// time, then SIGKILL").
    #[arg(long, default_value_t = 5_000, env = "TYMBAL_ENGINE_TERM_GRACE_MS")]
    pub engine_term_grace_ms: u64,

    /// Reconnect backoff floor for the control-channel client.
    #[arg(long, default_value_t = 500, env = "TYMBAL_RECONNECT_MIN_MS")]
    pub reconnect_min_ms: u64,

    /// Reconnect backoff ceiling for the control-channel client.
    #[arg(long, default_value_t = 30_000, env = "TYMBAL_RECONNECT_MAX_MS")]
    pub reconnect_max_ms: u64,

    /// Substitute `localhost` with this host alias in MCP server URLs and
    /// environment values (spec.md §4.6 "URL rewriting policy"). Unset
    /// disables rewriting.
    #[arg(long, env = "TYMBAL_LOCALHOST_ALIAS")]
    pub localhost_alias: Option<String>,
}

impl RuntimeConfig {
    pub fn engine_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.engine_ready_timeout_ms)
    }

    pub fn engine_term_grace(&self) -> Duration {
        Duration::from_millis(self.engine_term_grace_ms)
    }

    pub fn reconnect_min(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}
