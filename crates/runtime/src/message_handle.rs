// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message handle (component G, spec.md §4.7): a per-message scratchpad
//! used by engine output translators to emit well-formed frames. Grounded
//! on the teacher's `transport::ws_msg` `ServerMessage` shapes as the
//! target frames translate into, and on
//! `session::transition::feed_output`'s buffer-then-emit discipline.

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tymbal_protocol::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageHandleError {
    /// `stream`/`set` called after the message was already finalized by a
    /// prior `set`/`delete`.
    AlreadyFinalized,
}

impl std::fmt::Display for MessageHandleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("message already finalized")
    }
}

impl std::error::Error for MessageHandleError {}

/// Per-message scratchpad: `{id, metadata?, started, finalized, buffer}`
/// (spec.md §4.7). Frames are pushed onto an owned `mpsc` sender rather
/// than returned, so a translator can hold many handles concurrently
/// without threading a return value through every call site.
pub struct MessageHandle {
    id: String,
    metadata: Option<Map<String, Value>>,
    started: bool,
    finalized: bool,
    buffer: String,
    frames: mpsc::UnboundedSender<Frame>,
}

impl MessageHandle {
    pub fn new(id: impl Into<String>, metadata: Option<Map<String, Value>>, frames: mpsc::UnboundedSender<Frame>) -> Self {
        Self { id: id.into(), metadata, started: false, finalized: false, buffer: String::new(), frames }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Append `text` to the buffer, emitting a `start` on the first call.
    pub fn stream(&mut self, text: impl Into<String>) -> Result<(), MessageHandleError> {
        if self.finalized {
            return Err(MessageHandleError::AlreadyFinalized);
        }
        let text = text.into();
        if !self.started {
            self.started = true;
            let _ = self.frames.send(Frame::Start { i: self.id.clone(), m: self.metadata.clone() });
        }
        let _ = self.frames.send(Frame::Append { i: self.id.clone(), a: text.clone() });
        self.buffer.push_str(&text);
        Ok(())
    }

    /// Finalize the message with `value`. If `stream` was never called,
    /// emits exactly one `set` with `v = value`; otherwise emits a `set`
    /// whose value is `merge(metadata, {content: buffer}, value)` — later
    /// sources override earlier ones, so `value` always wins.
    pub fn set(&mut self, value: Value) -> Result<(), MessageHandleError> {
        if self.finalized {
            return Err(MessageHandleError::AlreadyFinalized);
        }
        let v = if self.started {
            let mut merged = self.metadata.clone().unwrap_or_default();
            merged.insert("content".to_owned(), Value::String(self.buffer.clone()));
            if let Value::Object(overrides) = value {
                merged.extend(overrides);
            }
            Value::Object(merged)
        } else {
            value
        };
        let t = iso8601_now();
        let _ = self.frames.send(Frame::Set { i: self.id.clone(), t, v });
        self.finalized = true;
        Ok(())
    }

    /// Delete the message outright, regardless of whether it was started.
    pub fn delete(&mut self) {
        let _ = self.frames.send(Frame::Reset { i: self.id.clone() });
        self.finalized = true;
    }
}

/// A dependency-free `SystemTime` → ISO 8601 formatter (same Howard
/// Hinnant civil-calendar algorithm as `tymbal_server::time::iso8601_now`;
/// duplicated rather than shared across the process boundary so the
/// runtime binary has no dependency on the server crate).
fn iso8601_now() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let dur = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = dur.as_secs();
    let time_secs = secs % 86400;
    let hours = time_secs / 3600;
    let minutes = (time_secs % 3600) / 60;
    let seconds = time_secs % 60;
    let days = secs / 86400;
    let z = days as i64 + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    format!("{y:04}-{m:02}-{d:02}T{hours:02}:{minutes:02}:{seconds:02}Z")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata() -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("type".to_owned(), json!("assistant"));
        m.insert("sender".to_owned(), json!("fox"));
        m.insert("senderType".to_owned(), json!("agent"));
        m
    }

    #[test]
    fn set_without_stream_emits_exactly_one_set_frame() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = MessageHandle::new("01J001", Some(metadata()), tx);
        handle.set(json!({"content": "done"})).expect("sets");

        let frame = rx.try_recv().expect("one frame emitted");
        match frame {
            Frame::Set { i, v, .. } => {
                assert_eq!(i, "01J001");
                assert_eq!(v, json!({"content": "done"}));
            }
            other => panic!("expected Set, got {other:?}"),
        }
        assert!(rx.try_recv().is_err(), "no second frame");
        assert!(handle.is_finalized());
    }

    #[test]
    fn stream_then_set_emits_start_append_append_set_with_merged_value() {
        // Scenario S2.
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = MessageHandle::new("01J001", Some(metadata()), tx);

        handle.stream("Hello ").expect("streams");
        handle.stream("world!").expect("streams");
        handle.set(json!({"content": "Hello world!"})).expect("sets");

        let start = rx.try_recv().expect("start frame");
        assert_eq!(start, Frame::Start { i: "01J001".to_owned(), m: Some(metadata()) });

        let append1 = rx.try_recv().expect("first append");
        assert_eq!(append1, Frame::Append { i: "01J001".to_owned(), a: "Hello ".to_owned() });

        let append2 = rx.try_recv().expect("second append");
        assert_eq!(append2, Frame::Append { i: "01J001".to_owned(), a: "world!".to_owned() });

        let set = rx.try_recv().expect("set frame");
        match set {
            Frame::Set { i, v, .. } => {
                assert_eq!(i, "01J001");
                assert_eq!(
                    v,
                    json!({
                        "type": "assistant",
                        "sender": "fox",
                        "senderType": "agent",
                        "content": "Hello world!",
                    })
                );
            }
            other => panic!("expected Set, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn explicit_value_overrides_buffered_content_and_metadata() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = MessageHandle::new("01J001", Some(metadata()), tx);
        handle.stream("buffered text").expect("streams");
        let _ = rx.try_recv(); // start
        let _ = rx.try_recv(); // append
        handle.set(json!({"content": "override wins", "type": "status"})).expect("sets");

        let set = rx.try_recv().expect("set frame");
        match set {
            Frame::Set { v, .. } => {
                assert_eq!(v["content"], json!("override wins"));
                assert_eq!(v["type"], json!("status"));
                assert_eq!(v["sender"], json!("fox"));
            }
            other => panic!("expected Set, got {other:?}"),
        }
    }

    #[test]
    fn further_stream_or_set_after_finalize_raises() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut handle = MessageHandle::new("01J001", None, tx);
        handle.set(json!({"content": "done"})).expect("sets");

        assert_eq!(handle.stream("more").unwrap_err(), MessageHandleError::AlreadyFinalized);
        assert_eq!(handle.set(json!({})).unwrap_err(), MessageHandleError::AlreadyFinalized);
    }

    #[test]
    fn delete_finalizes_and_emits_reset() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = MessageHandle::new("01J001", None, tx);
        handle.delete();

        let frame = rx.try_recv().expect("reset frame");
        assert_eq!(frame, Frame::Reset { i: "01J001".to_owned() });
        assert!(handle.is_finalized());
        assert_eq!(handle.set(json!({})).unwrap_err(), MessageHandleError::AlreadyFinalized);
    }
}
