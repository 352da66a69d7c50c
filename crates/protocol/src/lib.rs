// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol for the Tymbal agent control plane: the streaming frame
//! format (§4.1), @mention routing (§4.2), agent identity, and the runtime
//! control message set exchanged between `tymbal-server` and
//! `tymbal-runtime` (§4.4/§6).

pub mod agent_id;
pub mod control;
pub mod error;
pub mod frame;
pub mod ids;
pub mod mention;

pub use agent_id::AgentId;
pub use control::{HubMessage, RuntimeMessage, PROTOCOL_VERSION};
pub use error::ProtocolError;
pub use frame::{normalize_set_value, parse, parse_many, serialize, Frame};
pub use ids::{looks_like_id, new_id};
pub use mention::{route_mentions, MentionOutcome, RosterView, SenderKind};
