// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! URL rewriting policy for containerized deployment (spec.md §4.6): when
//! an alias is configured, every occurrence of `localhost` in MCP server
//! URLs and environment values is substituted with the alias. No other
//! rewrite is performed.

use serde_json::Value;

/// Rewrite `localhost` to `alias` inside a JSON value, recursing through
/// objects and arrays. Only string values containing the literal
/// substring `localhost` are touched; everything else passes through
/// untouched.
pub fn rewrite_localhost(value: &Value, alias: &str) -> Value {
    match value {
        Value::String(s) if s.contains("localhost") => Value::String(s.replace("localhost", alias)),
        Value::Array(items) => Value::Array(items.iter().map(|v| rewrite_localhost(v, alias)).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), rewrite_localhost(v, alias))).collect())
        }
        other => other.clone(),
    }
}

/// Apply the rewrite only when `alias` is configured; otherwise return
/// `value` unchanged (spec.md "Unset disables rewriting").
pub fn apply_if_configured(value: Option<&Value>, alias: Option<&str>) -> Option<Value> {
    let value = value?;
    match alias {
        Some(alias) => Some(rewrite_localhost(value, alias)),
        None => Some(value.clone()),
    }
}
