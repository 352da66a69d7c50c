// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Runtime-side error kinds (spec.md §7 "Engine"/"Transport"/"State-machine").
///
/// Closed set, convertible to a human-readable message but never a stack
/// trace, matching [`tymbal_protocol::ProtocolError`]'s shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    /// A requested engine id has no registered spawner, and no default
    /// fallback is configured.
    EngineUnavailable,
    /// The child process failed to spawn.
    SpawnFailed,
    /// The engine did not signal readiness within its init timeout.
    ReadyTimeout,
    /// `send` was called on an engine that has already terminated.
    EngineTerminated,
    /// The control connection to the server is down.
    NotConnected,
}

impl RuntimeError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EngineUnavailable => "engine_unavailable",
            Self::SpawnFailed => "spawn_failed",
            Self::ReadyTimeout => "ready_timeout",
            Self::EngineTerminated => "engine_terminated",
            Self::NotConnected => "not_connected",
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for RuntimeError {}

/// Classify an engine-reported error string into a coarse category used to
/// shape the `error`-typed frame surfaced to the channel (spec.md §7,
/// grounded on the teacher's `driver::error_category::classify_error_detail`
/// string-classification idiom).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    RateLimited,
    AuthFailed,
    Transport,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::AuthFailed => "auth_failed",
            Self::Transport => "transport",
            Self::Unknown => "unknown",
        }
    }
}

/// Classify a raw error message surfaced by an engine.
pub fn classify_error_detail(detail: &str) -> ErrorCategory {
    let lower = detail.to_lowercase();
    if lower.contains("rate limit") || lower.contains("429") || lower.contains("too many requests") {
        ErrorCategory::RateLimited
    } else if lower.contains("unauthorized")
        || lower.contains("401")
        || lower.contains("invalid api key")
        || lower.contains("authentication")
    {
        ErrorCategory::AuthFailed
    } else if lower.contains("connection reset")
        || lower.contains("broken pipe")
        || lower.contains("timed out")
        || lower.contains("econnrefused")
    {
        ErrorCategory::Transport
    } else {
        ErrorCategory::Unknown
    }
}
