// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `tymbal-server` binary as a subprocess and exercises it
//! over its HTTP and WebSocket surface, the same way a runtime or client
//! would in production.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Once;
use std::time::Duration;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Resolve the path to the compiled `tymbal-server` binary.
pub fn server_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("tymbal-server")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Builder for configuring a [`ServerProcess`] before spawn.
pub struct ServerBuilder {
    auth_token: Option<String>,
    checkin_timeout_ms: u64,
    ping_interval_ms: u64,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self { auth_token: None, checkin_timeout_ms: 30_000, ping_interval_ms: 15_000 }
    }
}

impl ServerBuilder {
    /// Require a bearer/query token on the HTTP and WS surface.
    pub fn auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    /// Override how long the lifecycle manager waits for `agent_checkin`.
    pub fn checkin_timeout_ms(mut self, ms: u64) -> Self {
        self.checkin_timeout_ms = ms;
        self
    }

    /// Override the control-channel ping interval.
    pub fn ping_interval_ms(mut self, ms: u64) -> Self {
        self.ping_interval_ms = ms;
        self
    }

    /// Spawn `tymbal-server` with the configured options.
    pub fn spawn(self) -> anyhow::Result<ServerProcess> {
        ensure_crypto();
        let binary = server_binary();
        anyhow::ensure!(binary.exists(), "tymbal-server binary not found at {}", binary.display());

        let port = free_port()?;

        let mut cmd = Command::new(&binary);
        cmd.args([
            "--host",
            "127.0.0.1",
            "--port",
            &port.to_string(),
            "--checkin-timeout-ms",
            &self.checkin_timeout_ms.to_string(),
            "--ping-interval-ms",
            &self.ping_interval_ms.to_string(),
        ]);
        if let Some(ref token) = self.auth_token {
            cmd.args(["--auth-token", token]);
        }
        cmd.env("RUST_LOG", "warn").stdout(Stdio::null()).stderr(Stdio::null());

        let child = cmd.spawn()?;

        Ok(ServerProcess { child, port, auth_token: self.auth_token })
    }
}

/// A running `tymbal-server` process that is killed on drop.
pub struct ServerProcess {
    child: Child,
    port: u16,
    auth_token: Option<String>,
}

impl ServerProcess {
    /// Create a builder for custom server configuration.
    pub fn build() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Spawn `tymbal-server` with no auth and default timeouts.
    pub fn start() -> anyhow::Result<Self> {
        Self::build().spawn()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    /// Base URL for HTTP requests.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// `/ws/client` URL for a given space/channel/user, with the auth token
    /// appended as a query parameter if one is configured.
    pub fn ws_client_url(&self, space: &str, channel: &str, user: &str) -> String {
        let mut url = format!(
            "ws://127.0.0.1:{}/ws/client?space={space}&channel={channel}&user={user}",
            self.port
        );
        if let Some(ref token) = self.auth_token {
            url.push_str(&format!("&token={token}"));
        }
        url
    }

    /// `/ws/runtime` URL, with the auth token appended if one is configured.
    pub fn ws_runtime_url(&self) -> String {
        let mut url = format!("ws://127.0.0.1:{}/ws/runtime", self.port);
        if let Some(ref token) = self.auth_token {
            url.push_str(&format!("?token={token}"));
        }
        url
    }

    /// Poll `/v1/health` until it responds successfully.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        let url = format!("{}/v1/health", self.base_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("tymbal-server did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(&mut self, timeout: Duration) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("tymbal-server did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
