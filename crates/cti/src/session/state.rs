// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory session state: agent identity, the authentication/status
//! state machines, and the phone snapshot. All of this lives on the
//! worker that owns the session — see [`crate::worker`].

use chrono::{DateTime, Utc};

/// Agent role level. Ordered: `Agent < Supervisor < Manager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum AgentLevel {
    Agent = 0,
    Supervisor = 1,
    Manager = 2,
}

impl AgentLevel {
    /// Decode the `level` column as stored in `acd_agent`.
    pub fn from_db(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Agent),
            1 => Some(Self::Supervisor),
            2 => Some(Self::Manager),
            _ => None,
        }
    }

    pub fn as_db(self) -> i32 {
        self as i32
    }
}

/// Authentication state of a connected session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    PreAuth,
    Authenticated,
    Closing,
}

/// Agent availability substate, journaled to `acd_log_agent_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AgentStatus {
    Login = 0,
    Ready = 1,
    NotReady = 2,
    Logout = 3,
    Aux = 4,
    Acw = 5,
}

impl AgentStatus {
    /// Map the `mode` attribute of a `ready` action (`not-ready` | `acw` |
    /// `aux`) to a status. Unknown modes fall back to `NotReady`.
    pub fn from_mode(mode: &str) -> Self {
        match mode {
            "acw" => Self::Acw,
            "aux" => Self::Aux,
            _ => Self::NotReady,
        }
    }

    pub fn as_db(self) -> i32 {
        self as i32
    }
}

/// Current phone snapshot for a session, mirrored into `<agent>` frames.
#[derive(Debug, Clone, Default)]
pub struct Phone {
    pub time: Option<DateTime<Utc>>,
    pub status: String,
    pub channel: String,
    /// Whether `channel` is the active leg (renders as `activechannel`/
    /// `callee`) or the passive leg (`passivechannel`/`caller`).
    pub active: bool,
    pub outbound: bool,
    pub dnis: String,
}

/// Monotonic per-agent counters, reset only on process restart.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub handle: u64,
    pub abandoned: u64,
}

/// Identity and mutable state for one authenticated agent. Bound to a
/// session once authentication succeeds (§3 "Agent identity").
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub agent_id: i64,
    pub username: String,
    pub fullname: String,
    pub level: AgentLevel,
}

/// Two open journaling row ids, mirroring §3's "two journaling ids".
#[derive(Debug, Clone, Copy, Default)]
pub struct JournalIds {
    pub session_log_id: Option<i64>,
    pub status_log_id: Option<i64>,
}
