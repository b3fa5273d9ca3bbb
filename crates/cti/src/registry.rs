// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The acceptor's registries (C4): address→session, username→address,
//! extension→username, each protected by its own lock (§5
//! "Shared-resource policy"). The address→session map owns the session
//! handle; the other two hold plain identifiers, resolved back to a
//! handle through address→session on use (§9 "Memory ownership").

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::group::AgentSnapshotMsg;
use crate::session::state::{AgentLevel, Phone};

/// A message marshalled onto a session's own task — no other task ever
/// touches its socket directly (§5 "no direct cross-worker write").
#[derive(Debug, Clone)]
pub enum SessionCommand {
    ForceLogout(String),
    AgentSnapshot(AgentSnapshotMsg),
    AgentLogout { username: String, extension: String, group: String },
    DialerResponse(String),
    /// Supervisor-forced status change (§4.5): the target applies this
    /// exactly as if it had sent `ready` itself, then runs its own
    /// broadcast.
    ForceStatus { ready: bool, outbound: bool },
}

/// A lightweight, cloneable reference to a live session: its identity as
/// known to the registry/group layer, a channel to its own task, a
/// read-only window onto its current phone snapshot (so a `spy` request
/// from another session's task can see the target's active channel
/// without round-tripping a query — only the owning task ever writes
/// it), and its most recently broadcast `<agent>` snapshot (replayed to
/// a newly joining, higher-level member — §4.5 "On join").
#[derive(Debug)]
pub struct SessionHandle {
    pub addr: SocketAddr,
    pub username: String,
    pub level: AgentLevel,
    pub extension: String,
    pub groups: Vec<String>,
    pub phone: RwLock<Phone>,
    pub last_snapshot: RwLock<Option<AgentSnapshotMsg>>,
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(
        addr: SocketAddr,
        username: String,
        level: AgentLevel,
        extension: String,
        groups: Vec<String>,
        commands: mpsc::Sender<SessionCommand>,
    ) -> Self {
        Self {
            addr,
            username,
            level,
            extension,
            groups,
            phone: RwLock::new(Phone::default()),
            last_snapshot: RwLock::new(None),
            commands,
        }
    }

    /// Best-effort send: a session whose task has already exited simply
    /// drops the command.
    pub async fn send(&self, command: SessionCommand) {
        let _ = self.commands.send(command).await;
    }
}

/// The process-wide registries the acceptor owns.
#[derive(Default)]
pub struct Registry {
    address_to_session: RwLock<HashMap<SocketAddr, Arc<SessionHandle>>>,
    username_to_address: RwLock<HashMap<String, SocketAddr>>,
    extension_to_username: RwLock<HashMap<String, String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly accepted, not-yet-authenticated session.
    pub async fn insert(&self, addr: SocketAddr, handle: Arc<SessionHandle>) {
        self.address_to_session.write().await.insert(addr, handle);
    }

    /// Remove a session on socket close. `username→address` is expected
    /// to have already been cleared by [`Registry::user_logged_out`] — a
    /// session that disconnects before authenticating never registered
    /// one.
    pub async fn remove(&self, addr: &SocketAddr) -> Option<Arc<SessionHandle>> {
        self.address_to_session.write().await.remove(addr)
    }

    /// `userLoggedIn` (§4.4): reject a second login for a username
    /// already bound to a session. On success, also binds the
    /// extension→username mapping if an extension was provided.
    pub async fn user_logged_in(
        &self,
        username: &str,
        addr: SocketAddr,
        extension: &str,
    ) -> Result<(), ()> {
        let mut usernames = self.username_to_address.write().await;
        if usernames.contains_key(username) {
            return Err(());
        }
        usernames.insert(username.to_owned(), addr);
        drop(usernames);

        if !extension.is_empty() {
            self.extension_to_username.write().await.insert(extension.to_owned(), username.to_owned());
        }

        Ok(())
    }

    /// `userLoggedOut` (§4.4): remove the username→address entry. The
    /// extension→username entry is left in place — a fresh login from
    /// the same extension overwrites it, matching the original's
    /// per-IP rather than per-session extension binding.
    pub async fn user_logged_out(&self, username: &str) {
        self.username_to_address.write().await.remove(username);
    }

    /// Every currently registered session, for shutdown broadcast (§5
    /// "Graceful shutdown").
    pub async fn snapshot(&self) -> Vec<Arc<SessionHandle>> {
        self.address_to_session.read().await.values().cloned().collect()
    }

    pub async fn session_by_address(&self, addr: &SocketAddr) -> Option<Arc<SessionHandle>> {
        self.address_to_session.read().await.get(addr).cloned()
    }

    pub async fn session_by_username(&self, username: &str) -> Option<Arc<SessionHandle>> {
        let addr = *self.username_to_address.read().await.get(username)?;
        self.session_by_address(&addr).await
    }

    /// Resolve a supervisor-targeted extension all the way to a session
    /// handle (§4.5 "Supervisor-initiated status change").
    pub async fn session_by_extension(&self, extension: &str) -> Option<Arc<SessionHandle>> {
        let username = self.extension_to_username.read().await.get(extension).cloned()?;
        self.session_by_username(&username).await
    }
}
