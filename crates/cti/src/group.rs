// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The group broker (C5): per-queue membership and the visibility rules
//! that decide who is broadcast whose status (§4.5).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::registry::{SessionCommand, SessionHandle};
use crate::session::state::Phone;

/// The payload of an `<agent>` snapshot frame, independent of the
/// session it is being rendered for — the receiver's `FrameWriter`
/// fills in the rest.
#[derive(Debug, Clone)]
pub struct AgentSnapshotMsg {
    pub username: String,
    pub fullname: String,
    pub group: Option<String>,
    pub handle: u64,
    pub abandoned: u64,
    pub time: String,
    pub phone: Phone,
}

/// `R ≠ S AND R.level > S.level` (§4.5 "Visibility").
fn visible_to(sender: &SessionHandle, receiver: &SessionHandle) -> bool {
    receiver.addr != sender.addr && receiver.level > sender.level
}

/// A named bag of authenticated sessions (one per queue).
struct Group {
    members: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl Group {
    fn new() -> Self {
        Self { members: RwLock::new(HashMap::new()) }
    }
}

/// Owns every [`Group`], created lazily on first member insertion and
/// kept for the life of the process (§3 "Lifecycles").
#[derive(Default)]
pub struct GroupBroker {
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl GroupBroker {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get_or_create(&self, queue: &str) -> Arc<Group> {
        if let Some(group) = self.groups.read().await.get(queue) {
            return Arc::clone(group);
        }
        let mut groups = self.groups.write().await;
        Arc::clone(groups.entry(queue.to_owned()).or_insert_with(|| Arc::new(Group::new())))
    }

    /// `addMember` (§4.5 "On join"): enrol `handle` into every named
    /// queue, broadcast its snapshot to higher-level existing members,
    /// then send it every existing member's snapshot it is entitled to
    /// see.
    pub async fn join(
        &self,
        queues: &[String],
        handle: Arc<SessionHandle>,
        snapshot: &AgentSnapshotMsg,
    ) {
        *handle.last_snapshot.write().await = Some(snapshot.clone());

        for queue in queues {
            let group = self.get_or_create(queue).await;

            let existing: Vec<Arc<SessionHandle>> = {
                let members = group.members.read().await;
                members.values().cloned().collect()
            };

            group.members.write().await.insert(handle.username.clone(), Arc::clone(&handle));

            let mut snapshot_for_queue = snapshot.clone();
            snapshot_for_queue.group = Some(queue.clone());

            for member in &existing {
                if visible_to(&handle, member) {
                    member
                        .send(SessionCommand::AgentSnapshot(snapshot_for_queue.clone()))
                        .await;
                }

                if visible_to(member, &handle) {
                    if let Some(mut existing_snapshot) = member.last_snapshot.read().await.clone() {
                        existing_snapshot.group = Some(queue.clone());
                        handle.send(SessionCommand::AgentSnapshot(existing_snapshot)).await;
                    }
                }
            }
        }
    }

    /// `onClientPhoneStatusChanged` (§4.5 "On phone-status change"):
    /// rebroadcast `sender`'s snapshot, visibility-filtered, to every
    /// named group it belongs to.
    pub async fn broadcast_status(
        &self,
        queues: &[String],
        sender: &Arc<SessionHandle>,
        snapshot: &AgentSnapshotMsg,
    ) {
        *sender.last_snapshot.write().await = Some(snapshot.clone());

        for queue in queues {
            let group = self.get_or_create(queue).await;
            let members: Vec<Arc<SessionHandle>> = {
                let members = group.members.read().await;
                members.values().cloned().collect()
            };

            let mut snapshot_for_queue = snapshot.clone();
            snapshot_for_queue.group = Some(queue.clone());

            for member in &members {
                if visible_to(sender, member) {
                    member.send(SessionCommand::AgentSnapshot(snapshot_for_queue.clone())).await;
                }
            }
        }
    }

    /// `onClientUserLoggedOut` (§4.5 "On logout"): remove `username`
    /// from every named group and notify higher-level remaining members.
    pub async fn leave(&self, queues: &[String], departing: &Arc<SessionHandle>) {
        for queue in queues {
            let group = self.get_or_create(queue).await;
            group.members.write().await.remove(&departing.username);

            let remaining: Vec<Arc<SessionHandle>> = {
                let members = group.members.read().await;
                members.values().cloned().collect()
            };

            for member in &remaining {
                if member.level > departing.level {
                    member
                        .send(SessionCommand::AgentLogout {
                            username: departing.username.clone(),
                            extension: departing.extension.clone(),
                            group: queue.clone(),
                        })
                        .await;
                }
            }
        }
    }

    /// Shared-queue check used by both `status` and `spy` (§4.5, and §9
    /// open question 4 — treated as required for both actions).
    pub fn shares_a_group(requester_groups: &[String], target_groups: &[String]) -> bool {
        requester_groups.iter().any(|g| target_groups.contains(g))
    }
}
