// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The persistence adapter (C6): a narrow interface for authentication
//! lookup and session/status journaling. The core never sees SQL text or
//! a connection pool type — only these operations and their semantics
//! (§4.6). [`PostgresAdapter`] is the production implementation;
//! [`MemoryAdapter`] backs unit tests.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::session::state::AgentLevel;

/// An agent record as stored in `acd_agent`.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub agent_id: i64,
    pub username: String,
    pub fullname: String,
    pub level: AgentLevel,
}

/// The `(acd_agent_exten_map_id, extension)` pair bound to a desktop IP.
#[derive(Debug, Clone)]
pub struct ExtensionBinding {
    pub exten_map_id: i64,
    pub extension: String,
}

/// A named skill, with its id, assigned to an agent.
#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub id: i64,
}

/// Narrow persistence interface consumed by the session/registry layer.
/// All operations are called on the owning worker's task; implementors
/// are free to pool connections however they like.
pub trait PersistenceAdapter: Send + Sync + 'static {
    /// Look up an agent by username and MD5-hex password. `NotFound` is
    /// not an error — callers translate it into an `AuthFailure`.
    fn find_agent(
        &self,
        username: &str,
        password_md5_hex: &str,
    ) -> impl Future<Output = Result<Option<AgentRecord>, String>> + Send;

    /// Look up the extension bound to a desktop IP address.
    fn find_extension_for_address(
        &self,
        ip: &str,
    ) -> impl Future<Output = Result<Option<ExtensionBinding>, String>> + Send;

    /// List the skills assigned to an agent, in retrieval order.
    fn list_skills(&self, agent_id: i64) -> impl Future<Output = Result<Vec<Skill>, String>> + Send;

    /// List the queue names an agent belongs to.
    fn list_groups(&self, agent_id: i64) -> impl Future<Output = Result<Vec<String>, String>> + Send;

    /// Open a new session-log row; returns its id.
    fn open_session_log(
        &self,
        agent_id: i64,
        exten_map_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<i64, String>> + Send;

    /// Close an open session-log row.
    fn close_session_log(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), String>> + Send;

    /// Open a new status-log row; returns its id.
    fn open_status_log(
        &self,
        session_log_id: i64,
        status: i32,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<i64, String>> + Send;

    /// Close an open status-log row.
    fn close_status_log(
        &self,
        id: i64,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), String>> + Send;
}

/// Production adapter backed by a Postgres connection pool.
pub struct PostgresAdapter {
    pool: sqlx::PgPool,
}

impl PostgresAdapter {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

impl PersistenceAdapter for PostgresAdapter {
    async fn find_agent(
        &self,
        username: &str,
        password_md5_hex: &str,
    ) -> Result<Option<AgentRecord>, String> {
        let row = sqlx::query_as::<_, (i64, String, String, i32)>(
            "SELECT acd_agent_id, name, fullname, level \
             FROM acd_agent \
             WHERE name = $1 AND password = $2",
        )
        .bind(username)
        .bind(password_md5_hex)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| e.to_string())?;

        Ok(row.and_then(|(agent_id, username, fullname, level)| {
            AgentLevel::from_db(level).map(|level| AgentRecord { agent_id, username, fullname, level })
        }))
    }

    async fn find_extension_for_address(
        &self,
        ip: &str,
    ) -> Result<Option<ExtensionBinding>, String> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT acd_agent_exten_map_id, extension \
             FROM acd_agent_exten_map \
             WHERE ip_address = $1",
        )
        .bind(ip)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| e.to_string())?;

        Ok(row.map(|(exten_map_id, extension)| ExtensionBinding { exten_map_id, extension }))
    }

    async fn list_skills(&self, agent_id: i64) -> Result<Vec<Skill>, String> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT acd_s.name, acd_as.acd_skill_id \
             FROM acd_agent_skill acd_as \
             LEFT JOIN acd_skill acd_s ON acd_as.acd_skill_id = acd_s.acd_skill_id \
             WHERE acd_as.acd_agent_id = $1",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.to_string())?;

        Ok(rows.into_iter().map(|(name, id)| Skill { name, id }).collect())
    }

    async fn list_groups(&self, agent_id: i64) -> Result<Vec<String>, String> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT acd_q.name \
             FROM acd_agent_group acd_ag \
             LEFT JOIN acd_queue acd_q ON acd_ag.acd_queue_id = acd_q.acd_queue_id \
             WHERE acd_ag.acd_agent_id = $1",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.to_string())?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn open_session_log(
        &self,
        agent_id: i64,
        exten_map_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<i64, String> {
        let (id,) = sqlx::query_as::<_, (i64,)>(
            "INSERT INTO acd_log_agent_session (acd_agent_id, acd_agent_exten_map_id, login_time) \
             VALUES ($1, $2, $3) \
             RETURNING acd_log_agent_session_id",
        )
        .bind(agent_id)
        .bind(exten_map_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.to_string())?;

        Ok(id)
    }

    async fn close_session_log(&self, id: i64, now: DateTime<Utc>) -> Result<(), String> {
        sqlx::query(
            "UPDATE acd_log_agent_session SET logout_time = $1 WHERE acd_log_agent_session_id = $2",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;

        Ok(())
    }

    async fn open_status_log(
        &self,
        session_log_id: i64,
        status: i32,
        now: DateTime<Utc>,
    ) -> Result<i64, String> {
        let (id,) = sqlx::query_as::<_, (i64,)>(
            "INSERT INTO acd_log_agent_status (acd_log_agent_session_id, acd_agent_status_id, start) \
             VALUES ($1, $2, $3) \
             RETURNING acd_log_agent_status_id",
        )
        .bind(session_log_id)
        .bind(status)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.to_string())?;

        Ok(id)
    }

    async fn close_status_log(&self, id: i64, now: DateTime<Utc>) -> Result<(), String> {
        sqlx::query("UPDATE acd_log_agent_status SET finish = $1 WHERE acd_log_agent_status_id = $2")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.to_string())?;

        Ok(())
    }
}

/// In-memory adapter for tests: one fixed agent table, in-memory logs.
#[cfg(any(test, feature = "test-support"))]
pub mod memory {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    use super::*;

    pub struct MemoryAdapter {
        agents: Vec<AgentRecord>,
        passwords: HashMap<String, String>,
        extensions: HashMap<String, ExtensionBinding>,
        skills: HashMap<i64, Vec<Skill>>,
        groups: HashMap<i64, Vec<String>>,
        next_id: AtomicI64,
        pub open_session_logs: Mutex<Vec<i64>>,
        pub open_status_logs: Mutex<Vec<i64>>,
    }

    impl Default for MemoryAdapter {
        fn default() -> Self {
            Self {
                agents: Vec::new(),
                passwords: HashMap::new(),
                extensions: HashMap::new(),
                skills: HashMap::new(),
                groups: HashMap::new(),
                next_id: AtomicI64::new(1),
                open_session_logs: Mutex::new(Vec::new()),
                open_status_logs: Mutex::new(Vec::new()),
            }
        }
    }

    impl MemoryAdapter {
        pub fn with_agent(
            mut self,
            agent: AgentRecord,
            password_md5_hex: &str,
            groups: Vec<String>,
            skills: Vec<Skill>,
        ) -> Self {
            self.passwords.insert(agent.username.clone(), password_md5_hex.to_owned());
            self.groups.insert(agent.agent_id, groups);
            self.skills.insert(agent.agent_id, skills);
            self.agents.push(agent);
            self
        }

        pub fn with_extension(mut self, ip: &str, exten_map_id: i64, extension: &str) -> Self {
            self.extensions.insert(
                ip.to_owned(),
                ExtensionBinding { exten_map_id, extension: extension.to_owned() },
            );
            self
        }

        fn next_id(&self) -> i64 {
            self.next_id.fetch_add(1, Ordering::Relaxed)
        }
    }

    impl PersistenceAdapter for MemoryAdapter {
        async fn find_agent(
            &self,
            username: &str,
            password_md5_hex: &str,
        ) -> Result<Option<AgentRecord>, String> {
            match self.passwords.get(username) {
                Some(expected) if expected == password_md5_hex => {
                    Ok(self.agents.iter().find(|a| a.username == username).cloned())
                }
                _ => Ok(None),
            }
        }

        async fn find_extension_for_address(
            &self,
            ip: &str,
        ) -> Result<Option<ExtensionBinding>, String> {
            Ok(self.extensions.get(ip).cloned())
        }

        async fn list_skills(&self, agent_id: i64) -> Result<Vec<Skill>, String> {
            Ok(self.skills.get(&agent_id).cloned().unwrap_or_default())
        }

        async fn list_groups(&self, agent_id: i64) -> Result<Vec<String>, String> {
            Ok(self.groups.get(&agent_id).cloned().unwrap_or_default())
        }

        async fn open_session_log(
            &self,
            _agent_id: i64,
            _exten_map_id: Option<i64>,
            _now: DateTime<Utc>,
        ) -> Result<i64, String> {
            let id = self.next_id();
            self.open_session_logs.lock().unwrap_or_else(|e| e.into_inner()).push(id);
            Ok(id)
        }

        async fn close_session_log(&self, id: i64, _now: DateTime<Utc>) -> Result<(), String> {
            self.open_session_logs.lock().unwrap_or_else(|e| e.into_inner()).retain(|x| *x != id);
            Ok(())
        }

        async fn open_status_log(
            &self,
            _session_log_id: i64,
            _status: i32,
            _now: DateTime<Utc>,
        ) -> Result<i64, String> {
            let id = self.next_id();
            self.open_status_logs.lock().unwrap_or_else(|e| e.into_inner()).push(id);
            Ok(id)
        }

        async fn close_status_log(&self, id: i64, _now: DateTime<Utc>) -> Result<(), String> {
            self.open_status_logs.lock().unwrap_or_else(|e| e.into_inner()).retain(|x| *x != id);
            Ok(())
        }
    }

    impl Clone for ExtensionBinding {
        fn clone(&self) -> Self {
            Self { exten_map_id: self.exten_map_id, extension: self.extension.clone() }
        }
    }
}
