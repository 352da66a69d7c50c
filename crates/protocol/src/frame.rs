// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Tymbal streaming frame protocol: newline-delimited JSON, one object
//! per line (spec.md §4.1, §6). `parse`/`serialize`/`parse_many` are pure,
//! stateless, and perform no I/O.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// A single line of the wire protocol.
///
/// Five message-id-bearing shapes (`start`, `append`, `set`, `reset`) plus
/// three control shapes with no `i` (`sync request`, `sync response`,
/// `error`) and one broadcast shape (`artifact`).
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Declares a new message, optionally with metadata. The key `content`
    /// is reserved and forbidden inside `m`.
    Start { i: String, m: Option<Map<String, Value>> },
    /// Appends text to the buffer for message `i`.
    Append { i: String, a: String },
    /// Finalizes message `i` with value `v` (always an object) at timestamp `t`.
    Set { i: String, t: String, v: Value },
    /// Deletes message `i`.
    Reset { i: String },
    /// `{request:"sync", channelId?, since?, before?, limit?}`
    SyncRequest {
        channel_id: Option<String>,
        since: Option<String>,
        before: Option<String>,
        limit: Option<u64>,
    },
    /// `{sync: timestamp}`
    SyncResponse { sync: String },
    /// `{error, message?}`
    Error { error: String, message: Option<String> },
    /// `{artifact:{action, channelId, payload}}`
    Artifact { action: String, channel_id: String, payload: Value },
}

impl Frame {
    /// The message id this frame applies to, if any.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Start { i, .. } | Self::Append { i, .. } | Self::Set { i, .. } | Self::Reset { i } => {
                Some(i)
            }
            Self::SyncRequest { .. } | Self::SyncResponse { .. } | Self::Error { .. } | Self::Artifact { .. } => {
                None
            }
        }
    }
}

/// Frames serialize through the same `serialize`/`parse` pair used for the
/// wire format, so the runtime control protocol (which embeds a `Frame`
/// inside a larger JSON envelope, spec.md §4.4) sees byte-identical field
/// ordering to the streaming protocol.
impl Serialize for Frame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let line = serialize(self);
        let value: Value = serde_json::from_str(&line).map_err(serde::ser::Error::custom)?;
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Frame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        parse(&value.to_string()).ok_or_else(|| serde::de::Error::custom("invalid frame"))
    }
}

/// Render a Rust string as a JSON string literal. `serde_json` cannot fail
/// on a well-formed `&str`; the fallback exists only to satisfy the
/// no-panics discipline, never to be exercised.
fn json_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_owned())
}

fn json_value(v: &Value) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "null".to_owned())
}

/// Serialize a [`Frame`] to its single-line wire form.
///
/// Message frames emit keys in the fixed order `i, m, a, t, v` (spec.md
/// §6) so producers are byte-exact; `parse` accepts any key order.
pub fn serialize(frame: &Frame) -> String {
    match frame {
        Frame::Start { i, m } => {
            let mut out = format!("{{\"i\":{}", json_string(i));
            if let Some(m) = m {
                out.push_str(",\"m\":");
                out.push_str(&json_value(&Value::Object(m.clone())));
            }
            out.push('}');
            out
        }
        Frame::Append { i, a } => {
            format!("{{\"i\":{},\"a\":{}}}", json_string(i), json_string(a))
        }
        Frame::Set { i, t, v } => {
            format!("{{\"i\":{},\"t\":{},\"v\":{}}}", json_string(i), json_string(t), json_value(v))
        }
        Frame::Reset { i } => {
            format!("{{\"i\":{},\"v\":null}}", json_string(i))
        }
        Frame::SyncRequest { channel_id, since, before, limit } => {
            let mut out = "{\"request\":\"sync\"".to_owned();
            if let Some(c) = channel_id {
                out.push_str(&format!(",\"channelId\":{}", json_string(c)));
            }
            if let Some(s) = since {
                out.push_str(&format!(",\"since\":{}", json_string(s)));
            }
            if let Some(b) = before {
                out.push_str(&format!(",\"before\":{}", json_string(b)));
            }
            if let Some(l) = limit {
                out.push_str(&format!(",\"limit\":{l}"));
            }
            out.push('}');
            out
        }
        Frame::SyncResponse { sync } => format!("{{\"sync\":{}}}", json_string(sync)),
        Frame::Error { error, message } => {
            let mut out = format!("{{\"error\":{}", json_string(error));
            if let Some(m) = message {
                out.push_str(&format!(",\"message\":{}", json_string(m)));
            }
            out.push('}');
            out
        }
        Frame::Artifact { action, channel_id, payload } => {
            format!(
                "{{\"artifact\":{{\"action\":{},\"channelId\":{},\"payload\":{}}}}}",
                json_string(action),
                json_string(channel_id),
                json_value(payload)
            )
        }
    }
}

/// Parse a single line into a [`Frame`], or `None` (⊥) if malformed.
///
/// Discriminates on key presence in this order: `request` → sync request,
/// `sync` → sync response, `error` → error, `artifact` → artifact, else
/// requires `i:string` and dispatches on `a`/`v`.
pub fn parse(line: &str) -> Option<Frame> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    let obj = value.as_object()?;

    if obj.contains_key("request") {
        return parse_sync_request(obj);
    }
    if obj.contains_key("sync") {
        return parse_sync_response(obj);
    }
    if obj.contains_key("error") {
        return parse_error(obj);
    }
    if obj.contains_key("artifact") {
        return parse_artifact(obj);
    }

    let i = obj.get("i")?.as_str()?.to_owned();
    let a = obj.get("a");
    let v = obj.get("v");

    match (a, v) {
        (Some(_), Some(_)) => None,
        (Some(a_val), None) => Some(Frame::Append { i, a: a_val.as_str()?.to_owned() }),
        (None, Some(v_val)) => {
            if v_val.is_null() {
                Some(Frame::Reset { i })
            } else if v_val.is_object() {
                let t = obj.get("t")?.as_str()?.to_owned();
                Some(Frame::Set { i, t, v: v_val.clone() })
            } else {
                None
            }
        }
        (None, None) => {
            let m = match obj.get("m") {
                None => None,
                Some(m_val) => {
                    let m_obj = m_val.as_object()?;
                    if m_obj.contains_key("content") {
                        return None;
                    }
                    Some(m_obj.clone())
                }
            };
            Some(Frame::Start { i, m })
        }
    }
}

fn parse_sync_request(obj: &Map<String, Value>) -> Option<Frame> {
    Some(Frame::SyncRequest {
        channel_id: obj.get("channelId").and_then(|v| v.as_str()).map(String::from),
        since: obj.get("since").and_then(|v| v.as_str()).map(String::from),
        before: obj.get("before").and_then(|v| v.as_str()).map(String::from),
        limit: obj.get("limit").and_then(|v| v.as_u64()),
    })
}

fn parse_sync_response(obj: &Map<String, Value>) -> Option<Frame> {
    let sync = obj.get("sync")?.as_str()?.to_owned();
    Some(Frame::SyncResponse { sync })
}

fn parse_error(obj: &Map<String, Value>) -> Option<Frame> {
    let error = obj.get("error")?.as_str()?.to_owned();
    let message = obj.get("message").and_then(|v| v.as_str()).map(String::from);
    Some(Frame::Error { error, message })
}

fn parse_artifact(obj: &Map<String, Value>) -> Option<Frame> {
    let art = obj.get("artifact")?.as_object()?;
    let action = art.get("action")?.as_str()?.to_owned();
    let channel_id = art.get("channelId")?.as_str()?.to_owned();
    let payload = art.get("payload")?;
    if !payload.is_object() {
        return None;
    }
    Some(Frame::Artifact { action, channel_id, payload: payload.clone() })
}

/// Parse an NDJSON blob into frames, dropping blank lines and malformed
/// lines silently (spec.md §4.1 `parseMany`).
pub fn parse_many(ndjson: &str) -> Vec<Frame> {
    ndjson.lines().filter_map(parse).collect()
}

/// Normalize a *set* frame's value before broadcast (spec.md §4.1, §8.8).
///
/// The only normalization performed: if `v.type == "tool_call"` and
/// `v.input` is present but `v.args` is not, rename `input` → `args`. Every
/// other shape passes through untouched.
pub fn normalize_set_value(v: &mut Value) {
    let Some(obj) = v.as_object_mut() else { return };
    let is_tool_call = obj.get("type").and_then(|t| t.as_str()) == Some("tool_call");
    if is_tool_call && obj.contains_key("input") && !obj.contains_key("args") {
        if let Some(input) = obj.remove("input") {
            obj.insert("args".to_owned(), input);
        }
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
