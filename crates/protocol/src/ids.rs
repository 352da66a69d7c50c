// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sortable, time-ordered entity identifiers.
//!
//! Every created entity (message, channel, runtime, connection, ...) gets a
//! 26-character Crockford-base32 ULID so that an unadorned string sort
//! equals creation order (spec.md §3).

use ulid::Ulid;

/// Generate a new 26-character sortable identifier.
pub fn new_id() -> String {
    Ulid::new().to_string()
}

/// Validate that a string has the shape of a sortable identifier produced
/// by [`new_id`]. Used at protocol boundaries to reject obviously malformed
/// ids before they are threaded through the system.
pub fn looks_like_id(s: &str) -> bool {
    s.len() == 26 && s.chars().all(|c| c.is_ascii_alphanumeric())
}
