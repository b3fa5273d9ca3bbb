// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Error taxonomy for the CTI server, per the error-handling design.
///
/// Every variant corresponds to a protocol-visible outcome or a logged,
/// absorbed failure. None of these traverse a worker boundary directly —
/// they are converted at the point of occurrence into a force-logout, a
/// `<message>`, a `<status>failed</status>`, or a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtiError {
    /// Malformed XML or an unrecognized action type. The frame is dropped
    /// and the session stays open.
    Protocol(String),
    /// Authentication payload did not match any agent record.
    AuthFailure(String),
    /// A second login arrived for a username already bound to a session.
    DuplicateLogin,
    /// The heartbeat watchdog expired.
    HeartbeatTimeout,
    /// The peer closed its side of the socket.
    PeerDisconnect,
    /// A database operation failed; never fatal, always logged.
    Database { query: String, cause: String },
    /// The AMI link is down, or an action was never answered before
    /// disconnect.
    Ami(AmiErrorKind),
}

/// Failure modes specific to the AMI client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmiErrorKind {
    /// The TCP connection to Asterisk is not currently established.
    Disconnected,
    /// The action's pending slot was dropped without a matching response
    /// (connection reset mid-flight).
    Unanswered,
}

impl fmt::Display for CtiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::AuthFailure(msg) => write!(f, "authentication failed: {msg}"),
            Self::DuplicateLogin => write!(f, "same user login"),
            Self::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            Self::PeerDisconnect => write!(f, "peer disconnected"),
            Self::Database { query, cause } => {
                write!(f, "database query '{query}' failed: {cause}")
            }
            Self::Ami(AmiErrorKind::Disconnected) => write!(f, "ami disconnected"),
            Self::Ami(AmiErrorKind::Unanswered) => write!(f, "ami action unanswered"),
        }
    }
}

impl std::error::Error for CtiError {}

pub type Result<T> = std::result::Result<T, CtiError>;
