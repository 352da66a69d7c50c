// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process engine: wraps an embedded agent library (an injected
//! collaborator, out of scope here — same treatment as `Storage` in
//! `tymbal-server`). Spawning does not fork a process; starting a turn
//! opens a bounded message stream whose first element is the initial
//! user content and whose later elements are pushes injected mid-turn,
//! batched and attributed. Grounded on the teacher's bounded
//! mpsc-channel-as-sink idiom (`DetectorSinks`/`stdout_rx`), repurposed
//! from multi-detector fan-in to a single-consumer injection queue.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    format_attributed, BoxFuture, ControlAction, EngineHandle, EngineInput, EngineSpawner, EngineState, ExitStatus,
    SpawnOptions, TerminateHandle,
};
use crate::error::RuntimeError;

/// One turn's injection queue, handed to the embedded agent library. The
/// first element a caller reads is the turn's opening content; every
/// subsequent `next_batched` call drains whatever pushes have queued up
/// since the last read and concatenates them, attributed, into one
/// element (spec.md §4.6 "batching multiple queued pushes into one
/// delivered element is an allowed optimization").
pub struct MessageStream {
    rx: mpsc::UnboundedReceiver<String>,
}

impl MessageStream {
    fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { rx }
    }

    /// Await the next element, batching any further pushes already
    /// queued at the moment this one is delivered. Returns `None` once
    /// the stream has been closed (turn complete or engine terminated).
    pub async fn next_batched(&mut self) -> Option<String> {
        let first = self.rx.recv().await?;
        let mut batch = vec![first];
        while let Ok(more) = self.rx.try_recv() {
            batch.push(more);
        }
        Some(batch.join("\n\n"))
    }
}

/// The embedded agent library this engine kind wraps. Out of scope here:
/// the system does not execute agent logic itself (spec.md §1); this
/// trait is the named interface a concrete SDK binding implements.
pub trait InProcessAgent: Send + Sync {
    /// Run one turn to completion, reading injected content from
    /// `stream` and emitting SDK-shape messages onto `output`. Returns
    /// once the stream closes and the agent has nothing further to
    /// produce for this turn.
    fn run_turn(&self, opts: SpawnOptions, stream: MessageStream, output: mpsc::UnboundedSender<Value>) -> BoxFuture<'static, ()>;
}

/// Spawns turns against an injected [`InProcessAgent`] rather than a
/// child process.
pub struct InProcessEngineSpawner {
    engine_id: &'static str,
    agent: Arc<dyn InProcessAgent>,
}

impl InProcessEngineSpawner {
    pub fn new(engine_id: &'static str, agent: Arc<dyn InProcessAgent>) -> Self {
        Self { engine_id, agent }
    }
}

struct InProcessTerminate {
    cancel: CancellationToken,
}

impl TerminateHandle for InProcessTerminate {
    fn terminate(&self, _reason: Option<String>) -> BoxFuture<'_, ()> {
        self.cancel.cancel();
        Box::pin(async {})
    }
}

impl EngineSpawner for InProcessEngineSpawner {
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
        let agent = Arc::clone(&self.agent);

        Box::pin(async move {
            // No process to wait on; the engine is ready the instant the
            // supervising task is spun up.
            let state = Arc::new(AtomicU8::new(EngineState::Ready.to_tag()));
            let (input_tx, mut input_rx) = mpsc::unbounded_channel::<EngineInput>();
            let cancel = CancellationToken::new();
            let terminate_handle: Arc<dyn TerminateHandle> = Arc::new(InProcessTerminate { cancel: cancel.clone() });
            let (handle, exit_handler) = EngineHandle::new(None, Arc::clone(&state), input_tx, terminate_handle);
            let handle = Arc::new(handle);

            let (turn_done_tx, mut turn_done_rx) = mpsc::unbounded_channel::<()>();
            let state_loop = Arc::clone(&state);

            tokio::spawn(async move {
                // Sender half of the active turn's stream, held here so an
                // `interrupt` or `terminate` can drop it to close the
                // stream early; `run_turn` observes `None` on its next
                // read and winds down.
                let mut active_tx: Option<mpsc::UnboundedSender<String>> = None;

                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            active_tx = None;
                            break;
                        }
                        input = input_rx.recv() => {
                            let Some(input) = input else { break };
                            match input {
                                EngineInput::UserMessage { message_id: _, sender, content } => {
                                    let text = content.as_str().map(str::to_owned).unwrap_or_else(|| content.to_string());
                                    if let Some(stream_tx) = &active_tx {
                                        let _ = stream_tx.send(format_attributed(&sender, &text));
                                    } else {
                                        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
                                        let _ = stream_tx.send(text);
                                        active_tx = Some(stream_tx);
                                        state_loop.store(EngineState::Busy.to_tag(), Ordering::Release);

                                        let agent = Arc::clone(&agent);
                                        let opts_clone = opts.clone();
                                        let out = output_tx.clone();
                                        let done_tx = turn_done_tx.clone();
                                        let stream = MessageStream::new(stream_rx);
                                        tokio::spawn(async move {
                                            agent.run_turn(opts_clone, stream, out).await;
                                            let _ = done_tx.send(());
                                        });
                                    }
                                }
                                EngineInput::Control(ControlAction::Interrupt) => {
                                    active_tx = None;
                                }
                                EngineInput::Control(ControlAction::Heartbeat) => {}
                            }
                        }
                        _ = turn_done_rx.recv() => {
                            active_tx = None;
                            if state_loop.load(Ordering::Acquire) == EngineState::Busy.to_tag() {
                                state_loop.store(EngineState::Ready.to_tag(), Ordering::Release);
                            }
                        }
                    }
                }
                state_loop.store(EngineState::Terminated.to_tag(), Ordering::Release);
                if let Some(cb) = exit_handler.lock().await.take() {
                    cb(ExitStatus::default());
                }
            });

            Ok(handle)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tymbal_protocol::AgentId;

    fn opts() -> SpawnOptions {
        SpawnOptions {
            agent_id: AgentId::new("sp", "ch", "fox"),
            system_prompt: String::new(),
            mcp_servers: None,
            workspace_path: "/work".to_owned(),
            environment: None,
        }
    }

    /// Echoes every element of the stream back onto `output` as an
    /// `{"type":"echo","content":...}` message, then returns once the
    /// stream closes.
    struct EchoAgent;

    impl InProcessAgent for EchoAgent {
        fn run_turn(&self, _opts: SpawnOptions, mut stream: MessageStream, output: mpsc::UnboundedSender<Value>) -> BoxFuture<'static, ()> {
            Box::pin(async move {
                while let Some(chunk) = stream.next_batched().await {
                    let _ = output.send(serde_json::json!({"type": "echo", "content": chunk}));
                }
            })
        }
    }

    #[tokio::test]
    async fn starts_ready_and_transitions_to_busy_then_back_to_ready_on_interrupt() {
        let spawner = InProcessEngineSpawner::new("claude-sdk", Arc::new(EchoAgent));
        let (output_tx, mut output_rx) = mpsc::unbounded_channel();
        let handle = spawner.spawn(opts(), output_tx).await.expect("spawns");
        assert_eq!(handle.state(), EngineState::Ready);
        assert!(handle.pid().is_none());

        handle
            .send(EngineInput::UserMessage {
                message_id: "m1".to_owned(),
                sender: "fox".to_owned(),
                content: Value::String("hello".to_owned()),
            })
            .expect("sends");

        let echoed = tokio::time::timeout(Duration::from_secs(1), output_rx.recv())
            .await
            .expect("no timeout")
            .expect("channel open");
        assert_eq!(echoed["content"], Value::String("hello".to_owned()));

        handle.send(EngineInput::Control(ControlAction::Interrupt)).expect("interrupts");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn concurrent_pushes_mid_turn_are_batched_and_attributed() {
        let spawner = InProcessEngineSpawner::new("claude-sdk", Arc::new(EchoAgent));
        let (output_tx, mut output_rx) = mpsc::unbounded_channel();
        let handle = spawner.spawn(opts(), output_tx).await.expect("spawns");

        handle
            .send(EngineInput::UserMessage {
                message_id: "m1".to_owned(),
                sender: "fox".to_owned(),
                content: Value::String("start turn".to_owned()),
            })
            .expect("sends");
        let first = tokio::time::timeout(Duration::from_secs(1), output_rx.recv()).await.unwrap().unwrap();
        assert_eq!(first["content"], Value::String("start turn".to_owned()));

        handle
            .send(EngineInput::UserMessage {
                message_id: "m2".to_owned(),
                sender: "bear".to_owned(),
                content: Value::String("mid-turn push".to_owned()),
            })
            .expect("sends");

        let pushed = tokio::time::timeout(Duration::from_secs(1), output_rx.recv()).await.unwrap().unwrap();
        assert_eq!(pushed["content"], Value::String(format_attributed("bear", "mid-turn push")));
    }

    #[tokio::test]
    async fn terminate_closes_the_active_turn_and_marks_the_engine_terminated() {
        let spawner = InProcessEngineSpawner::new("claude-sdk", Arc::new(EchoAgent));
        let (output_tx, _output_rx) = mpsc::unbounded_channel();
        let handle = spawner.spawn(opts(), output_tx).await.expect("spawns");

        handle
            .send(EngineInput::UserMessage {
                message_id: "m1".to_owned(),
                sender: "fox".to_owned(),
                content: Value::String("hi".to_owned()),
            })
            .expect("sends");

        handle.terminate(Some("suspended".to_owned())).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.state(), EngineState::Terminated);
        assert_eq!(handle.send(EngineInput::Control(ControlAction::Heartbeat)).unwrap_err(), RuntimeError::EngineTerminated);
    }
}
