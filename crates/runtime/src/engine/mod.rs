// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine supervisor (component F, spec.md §4.6): a uniform spawn/send/
//! stream/terminate interface over an in-process agent and a child NDJSON
//! process, plus an availability-probed registry with fallback-to-default
//! selection.
//!
//! Grounded on the teacher's `driver` module: the `Engine` trait
//! generalizes the `Detector` + backend-spawn split into one object-safe
//! trait covering both engine kinds; [`ChildEngine`] is grounded on
//! `driver::process::ProcessMonitor` (liveness polling, SIGTERM→SIGKILL
//! escalation) and `driver::jsonl_stdout::JsonlParser`; [`InProcessEngine`]
//! is grounded on the same bounded-mpsc-as-message-stream idiom the
//! teacher uses for `DetectorSinks`/`stdout_rx` wiring; the registry is
//! grounded on `broker::registry::PodRegistry::healthy_pods`.

pub mod child;
pub mod in_process;
pub mod url_rewrite;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tymbal_protocol::AgentId;

use crate::error::RuntimeError;

pub use child::ChildEngineSpawner;
pub use in_process::{InProcessAgent, InProcessEngineSpawner};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lifecycle state of one engine instance (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Starting,
    Ready,
    Busy,
    Terminated,
}

impl EngineState {
    fn to_tag(self) -> u8 {
        match self {
            Self::Starting => 0,
            Self::Ready => 1,
            Self::Busy => 2,
            Self::Terminated => 3,
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            0 => Self::Starting,
            1 => Self::Ready,
            2 => Self::Busy,
            _ => Self::Terminated,
        }
    }
}

/// Process exit outcome, mirroring `driver::ExitStatus` in the teacher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// Out-of-band signal delivered alongside ordinary turn content
/// (spec.md §4.6 "a `control{action:...}` channel exists for out-of-band
/// signals").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Interrupt,
    Heartbeat,
}

impl ControlAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "interrupt",
            Self::Heartbeat => "heartbeat",
        }
    }
}

/// A message delivered to a running engine: either a turn of content with
/// sender attribution, or an out-of-band control signal.
#[derive(Debug, Clone)]
pub enum EngineInput {
    UserMessage { message_id: String, sender: String, content: Value },
    Control(ControlAction),
}

/// Parameters the server's `activate`/`message` commands translate into
/// when spawning or feeding an engine (spec.md §4.4, §6).
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub agent_id: AgentId,
    pub system_prompt: String,
    pub mcp_servers: Option<Value>,
    pub workspace_path: String,
    pub environment: Option<Value>,
}

/// Render the sender-attribution prefix both engine kinds embed ahead of
/// injected content (spec.md §4.6 `--- @<sender> says:\n<content>`).
pub fn format_attributed(sender: &str, content: &str) -> String {
    format!("--- @{sender} says:\n{content}")
}

/// Per-engine-kind termination capability, invoked by
/// [`EngineHandle::terminate`] (spec.md §4.6 `terminate(reason?)`).
/// [`ChildEngineSpawner`] wires one that sends SIGTERM/SIGKILL by pid;
/// [`InProcessEngineSpawner`] wires one that closes the turn stream.
pub trait TerminateHandle: Send + Sync {
    fn terminate(&self, reason: Option<String>) -> BoxFuture<'_, ()>;
}

/// Uniform handle over a running engine instance, covering both the
/// in-process and child-process shapes (spec.md §4.6 "Both expose...").
pub struct EngineHandle {
    pid: Option<u32>,
    state: Arc<AtomicU8>,
    input_tx: mpsc::UnboundedSender<EngineInput>,
    exit_handler: Arc<Mutex<Option<Box<dyn FnOnce(ExitStatus) + Send>>>>,
    terminate_handle: Arc<dyn TerminateHandle>,
}

struct NoopTerminate;

impl TerminateHandle for NoopTerminate {
    fn terminate(&self, _reason: Option<String>) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

impl EngineHandle {
    fn new(
        pid: Option<u32>,
        state: Arc<AtomicU8>,
        input_tx: mpsc::UnboundedSender<EngineInput>,
        terminate_handle: Arc<dyn TerminateHandle>,
    ) -> (Self, Arc<Mutex<Option<Box<dyn FnOnce(ExitStatus) + Send>>>>) {
        let exit_handler = Arc::new(Mutex::new(None));
        (
            Self { pid, state, input_tx, exit_handler: Arc::clone(&exit_handler), terminate_handle },
            exit_handler,
        )
    }

    #[cfg(test)]
    fn new_for_test(
        pid: Option<u32>,
        state: Arc<AtomicU8>,
        input_tx: mpsc::UnboundedSender<EngineInput>,
    ) -> (Self, Arc<Mutex<Option<Box<dyn FnOnce(ExitStatus) + Send>>>>) {
        Self::new(pid, state, input_tx, Arc::new(NoopTerminate))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_tag(self.state.load(Ordering::Acquire))
    }

    /// Send a message to the running engine. Fails if the engine has
    /// already terminated.
    pub fn send(&self, input: EngineInput) -> Result<(), RuntimeError> {
        if self.state() == EngineState::Terminated {
            return Err(RuntimeError::EngineTerminated);
        }
        self.input_tx.send(input).map_err(|_| RuntimeError::EngineTerminated)
    }

    /// Register a one-shot callback invoked when the engine exits. Only
    /// the first registration before exit takes effect (spec.md §4.6
    /// `onExit(handler)`).
    pub async fn on_exit(&self, handler: impl FnOnce(ExitStatus) + Send + 'static) {
        let mut slot = self.exit_handler.lock().await;
        *slot = Some(Box::new(handler));
    }

    /// Terminate the engine. Idempotent: terminating twice is harmless,
    /// the second call observes `state() == Terminated` and the
    /// underlying capability is expected to no-op (spec.md §4.6
    /// `terminate(reason?)`).
    pub async fn terminate(&self, reason: Option<String>) {
        self.terminate_handle.terminate(reason).await;
    }
}

/// Probes availability and spawns a concrete engine kind.
pub trait EngineSpawner: Send + Sync {
    /// Stable engine id, e.g. `"claude-sdk"`, `"nuum"`.
    fn id(&self) -> &'static str;

    /// Cheap liveness probe; `false` excludes this spawner from
    /// selection without attempting a spawn.
    fn is_available(&self) -> bool;

    /// Spawn a new engine instance. `output_tx` receives every SDK-shape
    /// message the engine produces, in order.
    fn spawn(
        &self,
        opts: SpawnOptions,
        output_tx: mpsc::UnboundedSender<Value>,
    ) -> BoxFuture<'static, Result<Arc<EngineHandle>, RuntimeError>>;
}

/// Registry of known engine spawners, keyed by engine id, with
/// fallback-to-default selection when the requested engine is unavailable
/// (spec.md §4.6, grounded on `PodRegistry::healthy_pods`).
pub struct EngineRegistry {
    spawners: HashMap<&'static str, Arc<dyn EngineSpawner>>,
    default_id: &'static str,
}

impl EngineRegistry {
    pub fn new(default_id: &'static str) -> Self {
        Self { spawners: HashMap::new(), default_id }
    }

    pub fn register(&mut self, spawner: Arc<dyn EngineSpawner>) {
        self.spawners.insert(spawner.id(), spawner);
    }

    /// Resolve `requested_id` to a spawner, falling back to the
    /// registry's default if the requested one is missing or reports
    /// itself unavailable.
    pub fn select(&self, requested_id: &str) -> Result<Arc<dyn EngineSpawner>, RuntimeError> {
        if let Some(spawner) = self.spawners.get(requested_id) {
            if spawner.is_available() {
                return Ok(Arc::clone(spawner));
            }
        }
        let fallback = self.spawners.get(self.default_id).ok_or(RuntimeError::EngineUnavailable)?;
        if fallback.is_available() {
            Ok(Arc::clone(fallback))
        } else {
            Err(RuntimeError::EngineUnavailable)
        }
    }
}
