// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child-process engine: spawns an external binary, communicates via
//! NDJSON over stdin/stdout, logs stderr. Grounded on
//! `driver::process::ProcessMonitor` (liveness polling, SIGTERM→SIGKILL
//! escalation) and `driver::jsonl_stdout::JsonlParser` (incremental NDJSON
//! framing off a byte stream), generalized from "classify screen state"
//! to "parse SDK-shape messages directly" since these engines emit
//! structured frames, not terminal text.

use std::process::Stdio;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::{
    format_attributed, BoxFuture, ControlAction, EngineHandle, EngineInput, EngineSpawner, EngineState, ExitStatus,
    SpawnOptions, TerminateHandle,
};
use crate::error::RuntimeError;

/// Incremental line-buffered NDJSON reader, grounded on
/// `driver::jsonl_stdout::JsonlParser`.
struct JsonlParser {
    line_buf: Vec<u8>,
}

impl JsonlParser {
    fn new() -> Self {
        Self { line_buf: Vec::new() }
    }

    /// Feed a chunk of bytes, returning every complete JSON value framed
    /// by a newline. Malformed lines are dropped (mirrors
    /// `tymbal_protocol::frame::parse_many`'s tolerance of bad input).
    fn feed(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.line_buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.line_buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.line_buf.drain(..=pos).collect();
            let trimmed = &line[..line.len() - 1];
            if trimmed.is_empty() {
                continue;
            }
            if let Ok(value) = serde_json::from_slice::<Value>(trimmed) {
                out.push(value);
            }
        }
        out
    }
}

/// Spawns an external binary and speaks NDJSON over its stdio.
pub struct ChildEngineSpawner {
    engine_id: &'static str,
    program: String,
    args: Vec<String>,
    ready_timeout: Duration,
    term_grace: Duration,
}

impl ChildEngineSpawner {
    pub fn new(
        engine_id: &'static str,
        program: impl Into<String>,
        args: Vec<String>,
        ready_timeout: Duration,
        term_grace: Duration,
    ) -> Self {
        Self { engine_id, program: program.into(), args, ready_timeout, term_grace }
    }
}

fn is_process_alive(pid: u32) -> bool {
    let Ok(pid_i32) = i32::try_from(pid) else { return false };
    kill(Pid::from_raw(pid_i32), None).is_ok()
}

async fn terminate_pid(pid: u32, grace: Duration) {
    let Ok(pid_i32) = i32::try_from(pid) else { return };
    let nix_pid = Pid::from_raw(pid_i32);
    let _ = kill(nix_pid, Signal::SIGTERM);
    tokio::time::sleep(grace).await;
    if is_process_alive(pid) {
        let _ = kill(nix_pid, Signal::SIGKILL);
    }
}

/// Binds a `pid` and grace period to the uniform [`TerminateHandle`]
/// interface (spec.md §4.6 "Termination sends SIGTERM, waits a bounded
/// time, then SIGKILL"). `reason` has no wire effect for a child process;
/// it exists only so the capability is uniform across engine kinds.
struct ChildTerminate {
    pid: Option<u32>,
    grace: Duration,
}

impl TerminateHandle for ChildTerminate {
    fn terminate(&self, _reason: Option<String>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(pid) = self.pid {
                terminate_pid(pid, self.grace).await;
            }
        })
    }
}

impl EngineSpawner for ChildEngineSpawner {
    fn id(&self) -> &'static str {
        self.engine_id
    }

    fn is_available(&self) -> bool {
        true
    }

    fn spawn(
        &self,
        opts: SpawnOptions,
        output_tx: mpsc::UnboundedSender<Value>,
    ) -> BoxFuture<'static, Result<Arc<EngineHandle>, RuntimeError>> {
        let program = self.program.clone();
        let args = self.args.clone();
        let ready_timeout = self.ready_timeout;
        let term_grace = self.term_grace;

        Box::pin(async move {
            let mut command = Command::new(&program);
            command.args(&args).current_dir(&opts.workspace_path);
            if let Some(Value::Object(env)) = &opts.environment {
                for (k, v) in env {
                    if let Some(v_str) = v.as_str() {
                        command.env(k, v_str);
                    }
                }
            }
            command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

            let mut child = command.spawn().map_err(|e| {
                tracing::warn!(error = %e, program = %program, "child engine spawn failed");
                RuntimeError::SpawnFailed
            })?;
            let pid = child.id();

            let stdin = child.stdin.take().ok_or(RuntimeError::SpawnFailed)?;
            let stdout = child.stdout.take().ok_or(RuntimeError::SpawnFailed)?;
            let stderr = child.stderr.take().ok_or(RuntimeError::SpawnFailed)?;

            let state = Arc::new(AtomicU8::new(EngineState::Starting.to_tag()));
            let (input_tx, mut input_rx) = mpsc::unbounded_channel::<EngineInput>();
            let terminate_handle: Arc<dyn TerminateHandle> = Arc::new(ChildTerminate { pid, grace: term_grace });
            let (handle, exit_handler) = EngineHandle::new(pid, Arc::clone(&state), input_tx, terminate_handle);
            let handle = Arc::new(handle);

            let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<()>();
            let mut ready_tx = Some(ready_tx);

            // stderr: log every line (spec.md §4.6 "logs stderr").
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(engine_stderr = %line, "child engine stderr");
                }
            });

            // stdout: incremental NDJSON framing; the first `init` line
            // signals readiness.
            let state_for_stdout = Arc::clone(&state);
            let output_tx_stdout = output_tx.clone();
            let stdout_task = tokio::spawn(async move {
                let mut reader = BufReader::new(stdout);
                let mut parser = JsonlParser::new();
                let mut buf = [0u8; 4096];
                loop {
                    use tokio::io::AsyncReadExt;
                    match reader.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            for value in parser.feed(&buf[..n]) {
                                if value.get("type").and_then(|t| t.as_str()) == Some("init") {
                                    if state_for_stdout.load(Ordering::Acquire) == EngineState::Starting.to_tag() {
                                        state_for_stdout.store(EngineState::Ready.to_tag(), Ordering::Release);
                                    }
                                    if let Some(tx) = ready_tx.take() {
                                        let _ = tx.send(());
                                    }
                                    continue;
                                }
                                let _ = output_tx_stdout.send(value);
                            }
                        }
                        Err(_) => break,
                    }
                }
            });

            // stdin writer: user messages embed sender attribution;
            // control actions are out-of-band.
            tokio::spawn(async move {
                let mut stdin = stdin;
                while let Some(input) = input_rx.recv().await {
                    let line = match input {
                        EngineInput::UserMessage { message_id, sender, content } => {
                            let text = content.as_str().map(str::to_owned).unwrap_or_else(|| content.to_string());
                            json!({
                                "type": "user",
                                "messageId": message_id,
                                "content": format_attributed(&sender, &text),
                            })
                        }
                        EngineInput::Control(action) => json!({"type": "control", "action": action.as_str()}),
                    };
                    let mut bytes = serde_json::to_vec(&line).unwrap_or_default();
                    bytes.push(b'\n');
                    if stdin.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
            });

            // Reaper: waits for the child to exit (naturally or via
            // `terminate`) and fires the registered exit handler once.
            let state_for_exit = Arc::clone(&state);
            tokio::spawn(async move {
                let status = child.wait().await.ok();
                let _ = stdout_task.await;
                state_for_exit.store(EngineState::Terminated.to_tag(), Ordering::Release);
                let exit = ExitStatus {
                    code: status.and_then(|s| s.code()),
                    signal: status.and_then(|s| std::os::unix::process::ExitStatusExt::signal(&s)),
                };
                if let Some(cb) = exit_handler.lock().await.take() {
                    cb(exit);
                }
            });

            match tokio::time::timeout(ready_timeout, ready_rx).await {
                Ok(_) => Ok(handle),
                Err(_) => {
                    if let Some(pid) = pid {
                        terminate_pid(pid, term_grace).await;
                    }
                    Err(RuntimeError::ReadyTimeout)
                }
            }
        })
    }
}

/// Terminate a running child engine by pid: SIGTERM, wait up to `grace`,
/// then SIGKILL (spec.md §4.6 "Termination sends SIGTERM, waits a bounded
/// time, then SIGKILL").
pub async fn terminate(handle: &EngineHandle, grace: Duration) {
    if let Some(pid) = handle.pid() {
        terminate_pid(pid, grace).await;
    }
}
