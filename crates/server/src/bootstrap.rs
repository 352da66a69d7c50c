// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bootstrap token exchange (spec.md §3 "Bootstrap token / server
//! credential"): a short-lived opaque string, handed to a runtime out of
//! band, exchanged exactly once for the long-lived credential it uses on
//! its control connection. Grounded on the teacher's PKCE token shape
//! (issue once, redeem once) without carrying over its OAuth machinery —
//! there is no authorization-code flow here, just a single-use swap.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tymbal_protocol::new_id;

const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct ServerCredential {
    pub token: String,
    pub space_id: String,
}

struct PendingBootstrap {
    space_id: String,
    issued_at: Instant,
}

/// Issues and redeems single-use bootstrap tokens.
pub struct BootstrapBroker {
    pending: RwLock<HashMap<String, PendingBootstrap>>,
    ttl: Duration,
}

impl Default for BootstrapBroker {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }
}

impl BootstrapBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self { pending: RwLock::new(HashMap::new()), ttl }
    }

    /// Issue a bootstrap token for `space_id`.
    pub async fn issue(&self, space_id: impl Into<String>) -> String {
        let token = new_id();
        self.pending
            .write()
            .await
            .insert(token.clone(), PendingBootstrap { space_id: space_id.into(), issued_at: Instant::now() });
        token
    }

    /// Redeem a bootstrap token for a long-lived [`ServerCredential`].
    /// Consumes the token unconditionally, so a second call with the same
    /// token always returns `None`, even if the first call is still
    /// in-flight concurrently.
    pub async fn exchange(&self, token: &str) -> Option<ServerCredential> {
        let entry = self.pending.write().await.remove(token)?;
        if entry.issued_at.elapsed() > self.ttl {
            return None;
        }
        Some(ServerCredential { token: new_id(), space_id: entry.space_id })
    }
}
