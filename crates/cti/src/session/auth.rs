// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `checkAuthentication` (§4.2): decode the payload, hash the password,
//! look the agent up, and — on success — bind its identity and open the
//! session/status journal rows.

use base64::Engine;
use chrono::Utc;
use md5::{Digest, Md5};

use crate::error::CtiError;
use crate::persistence::PersistenceAdapter;
use crate::session::state::{AgentIdentity, AgentStatus, JournalIds};

/// Everything the protocol layer needs to render the success frame.
pub struct AuthSuccess {
    pub identity: AgentIdentity,
    pub extension: Option<String>,
    pub exten_map_id: Option<i64>,
    pub skills: Vec<(String, i64)>,
    pub groups: Vec<String>,
    pub journal: JournalIds,
}

fn hash_password(password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Decode the authentication payload (base64 if `encrypted`), split at
/// the first `:` into `(username, password)`. A payload with no `:` is a
/// protocol error, not a failed login.
fn split_credentials(payload: &str, encrypted: bool) -> Result<(String, String), CtiError> {
    let decoded = if encrypted {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| CtiError::Protocol(format!("invalid base64 authentication payload: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| CtiError::Protocol(format!("authentication payload is not utf-8: {e}")))?
    } else {
        payload.to_owned()
    };

    decoded
        .split_once(':')
        .map(|(u, p)| (u.to_owned(), p.to_owned()))
        .ok_or_else(|| CtiError::Protocol("authentication payload missing ':'".to_owned()))
}

/// Run the full authentication flow: decode, hash, look up, and (on
/// success) open the journal rows. `peer_ip` and any extension already
/// bound to the session feed extension binding (§4.2 "Extension
/// binding" — looked up only if not already bound).
pub async fn check_authentication<P: PersistenceAdapter>(
    persistence: &P,
    payload: &str,
    encrypted: bool,
    peer_ip: &str,
    already_bound_extension: Option<&str>,
) -> Result<AuthSuccess, CtiError> {
    let (username, password) = split_credentials(payload, encrypted)?;
    let password_hash = hash_password(&password);

    let agent = persistence
        .find_agent(&username, &password_hash)
        .await
        .map_err(|cause| CtiError::Database { query: "retrieving user".to_owned(), cause })?;

    let Some(agent) = agent else {
        return Err(CtiError::AuthFailure("Username/Password incorrect".to_owned()));
    };

    let (extension, exten_map_id) = if let Some(ext) = already_bound_extension.filter(|e| !e.is_empty()) {
        (Some(ext.to_owned()), None)
    } else {
        match persistence.find_extension_for_address(peer_ip).await {
            Ok(Some(binding)) => (Some(binding.extension), Some(binding.exten_map_id)),
            Ok(None) => (None, None),
            Err(cause) => {
                tracing::warn!(cause, "retrieving extension failed");
                (None, None)
            }
        }
    };

    let skills = match persistence.list_skills(agent.agent_id).await {
        Ok(skills) => skills.into_iter().map(|s| (s.name, s.id)).collect(),
        Err(cause) => {
            tracing::warn!(cause, "retrieving user's skills failed");
            Vec::new()
        }
    };

    let groups = match persistence.list_groups(agent.agent_id).await {
        Ok(groups) => groups,
        Err(cause) => {
            tracing::warn!(cause, "retrieving user's groups failed");
            Vec::new()
        }
    };

    let now = Utc::now();
    let mut journal = JournalIds::default();

    match persistence.open_session_log(agent.agent_id, exten_map_id, now).await {
        Ok(id) => journal.session_log_id = Some(id),
        Err(cause) => tracing::warn!(cause, "inserting session log failed"),
    }

    if let Some(session_log_id) = journal.session_log_id {
        match persistence.open_status_log(session_log_id, AgentStatus::Login.as_db(), now).await {
            Ok(id) => journal.status_log_id = Some(id),
            Err(cause) => tracing::warn!(cause, "inserting status log failed"),
        }
    }

    Ok(AuthSuccess {
        identity: AgentIdentity {
            agent_id: agent.agent_id,
            username: agent.username,
            fullname: agent.fullname,
            level: agent.level,
        },
        extension,
        exten_map_id,
        skills,
        groups,
        journal,
    })
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
