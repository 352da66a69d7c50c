// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! @mention routing (spec.md §4.2): given a message's text, sender, and
//! channel roster, compute which agents receive it. Pure, no I/O.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;

/// Who produced the message being routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderKind {
    User,
    Agent,
}

/// The subset of a channel's membership the router needs: its agents, its
/// human participants, and the agent that stands in for bare messages with
/// no mention.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterView {
    pub agents: Vec<String>,
    pub users: Vec<String>,
    pub leader: Option<String>,
}

/// The result of routing: who gets the message, and whether this was a
/// `@channel` broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionOutcome {
    pub targets: Vec<String>,
    pub broadcast: bool,
}

fn mention_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // This pattern is a fixed literal; it always compiles.
    #[allow(clippy::unwrap_used)]
    RE.get_or_init(|| Regex::new(r"@([A-Za-z0-9_-]+)").unwrap())
}

/// Extract distinct lowercased `@token`s in first-appearance order.
fn extract_mentions(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();
    for cap in mention_pattern().captures_iter(text) {
        let Some(m) = cap.get(1) else { continue };
        let token = m.as_str().to_lowercase();
        if seen.insert(token.clone()) {
            tokens.push(token);
        }
    }
    tokens
}

/// Route a message to its delivery targets.
///
/// Rules, applied in order: `@channel` ⇒ broadcast to every agent but the
/// sender; else any mentions ⇒ the mentioned names that are actually on the
/// roster, minus the sender; else a user sender falls back to the channel
/// leader; else (an agent sender with no mentions) the message is logged
/// only and reaches nobody.
pub fn route_mentions(
    text: &str,
    sender: Option<&str>,
    sender_kind: SenderKind,
    roster: &RosterView,
) -> MentionOutcome {
    let tokens = extract_mentions(text);
    let sender_lc = sender.map(str::to_lowercase);
    let is_sender = |name: &str| sender_lc.as_deref() == Some(name.to_lowercase().as_str());

    if tokens.iter().any(|t| t == "channel") {
        let targets = roster.agents.iter().filter(|a| !is_sender(a)).cloned().collect();
        return MentionOutcome { targets, broadcast: true };
    }

    if !tokens.is_empty() {
        let lookup: HashMap<String, &String> = roster
            .agents
            .iter()
            .chain(roster.users.iter())
            .map(|name| (name.to_lowercase(), name))
            .collect();
        let targets = tokens
            .iter()
            .filter_map(|t| lookup.get(t).copied())
            .filter(|name| !is_sender(name))
            .cloned()
            .collect();
        return MentionOutcome { targets, broadcast: false };
    }

    match sender_kind {
        SenderKind::User => {
            MentionOutcome { targets: roster.leader.iter().cloned().collect(), broadcast: false }
        }
        SenderKind::Agent => MentionOutcome { targets: Vec::new(), broadcast: false },
    }
}
