// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent identity: the `(spaceId, channelId, callsign)` triple, serialized
//! as the colon-joined canonical string (spec.md §3, §6, §9 "Agent
//! identity split"). Always parse with [`AgentId::parse`]; never
//! string-interpolate the three segments back together by hand.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// The unit of addressing across the runtime control protocol and the
/// frame stream: which space, which channel, which callsign.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId {
    pub space_id: String,
    pub channel_id: String,
    pub callsign: String,
}

impl AgentId {
    pub fn new(
        space_id: impl Into<String>,
        channel_id: impl Into<String>,
        callsign: impl Into<String>,
    ) -> Self {
        Self { space_id: space_id.into(), channel_id: channel_id.into(), callsign: callsign.into() }
    }

    /// Parse `"<spaceId>:<channelId>:<callsign>"`. Requires exactly three
    /// nonempty segments (spec.md §3 invariant).
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        let mut parts = s.splitn(3, ':');
        let space_id = parts.next().ok_or(ProtocolError::InvalidAgentId)?;
        let channel_id = parts.next().ok_or(ProtocolError::InvalidAgentId)?;
        let callsign = parts.next().ok_or(ProtocolError::InvalidAgentId)?;

        if space_id.is_empty() || channel_id.is_empty() || callsign.is_empty() {
            return Err(ProtocolError::InvalidAgentId);
        }
        // splitn(3, ..) leaves any further colons inside `callsign`; reject
        // that so the triple round-trips losslessly through Display.
        if callsign.contains(':') {
            return Err(ProtocolError::InvalidAgentId);
        }

        Ok(Self {
            space_id: space_id.to_owned(),
            channel_id: channel_id.to_owned(),
            callsign: callsign.to_owned(),
        })
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.space_id, self.channel_id, self.callsign)
    }
}

impl FromStr for AgentId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AgentId {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> String {
        id.to_string()
    }
}
