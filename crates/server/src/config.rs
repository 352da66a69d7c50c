// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the Tymbal server.
#[derive(Debug, Clone, clap::Args)]
pub struct ServerConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "TYMBAL_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9900, env = "TYMBAL_PORT")]
    pub port: u16,

    /// Bearer token for HTTP API auth. If unset, auth is disabled.
    #[arg(long, env = "TYMBAL_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// How long the lifecycle manager waits for `agent_checkin` after
    /// `activate` before moving the agent to `error` (spec.md §5).
    #[arg(long, default_value_t = 30_000, env = "TYMBAL_CHECKIN_TIMEOUT_MS")]
    pub checkin_timeout_ms: u64,

    /// How often the background sweeper checks for activations stuck past
    /// `checkin_timeout_ms`.
    #[arg(long, default_value_t = 5_000, env = "TYMBAL_ACTIVATION_SWEEP_MS")]
    pub activation_sweep_ms: u64,

    /// Interval between control-channel `ping`s sent to each runtime.
    #[arg(long, default_value_t = 15_000, env = "TYMBAL_PING_INTERVAL_MS")]
    pub ping_interval_ms: u64,

    /// Consecutive missed `pong`s before a runtime connection is closed.
    #[arg(long, default_value_t = 3, env = "TYMBAL_MAX_MISSED_PONGS")]
    pub max_missed_pongs: u32,

    /// Default page size for `sync` requests when the client omits `limit`.
    #[arg(long, default_value_t = 100, env = "TYMBAL_DEFAULT_SYNC_LIMIT")]
    pub default_sync_limit: u64,
}

impl ServerConfig {
    pub fn checkin_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.checkin_timeout_ms)
    }

    pub fn ping_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.ping_interval_ms)
    }

    pub fn activation_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.activation_sweep_ms)
    }
}
