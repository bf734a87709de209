//! # Session History
//!
//! Append-only persistence of round events, plus the per-session summary
//! rows derived from the `session_started` / `session_terminated` events.

use super::db::{lock, AgoraDb};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Event type that opens a session row
pub const SESSION_STARTED: &str = "session_started";
/// Event type that closes a session row
pub const SESSION_TERMINATED: &str = "session_terminated";

/// Persistence sink for round events. Append-only, best-effort.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn log_round(
        &self,
        session_id: &str,
        event_type: &str,
        data: &serde_json::Value,
        actor: &str,
        iteration: u32,
    ) -> Result<()>;
}

/// A persisted session summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub goal: String,
    pub status: String,
    pub termination: Option<String>,
    pub iterations: u32,
    pub final_decision: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A persisted round event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub session_id: String,
    pub event_type: String,
    pub actor: String,
    pub iteration: u32,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed event sink and session history
pub struct SqliteEventSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventSink {
    /// Create from shared AgoraDb connection
    pub fn new(db: &AgoraDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Open a session row directly (outside a coordinator run)
    pub fn start_session(&self, session_id: &str, goal: &str) -> Result<()> {
        self.append(
            session_id,
            SESSION_STARTED,
            &serde_json::json!({ "goal": goal }),
            "coordinator",
            0,
        )
    }

    /// Close a session row directly (outside a coordinator run)
    pub fn finish_session(
        &self,
        session_id: &str,
        termination: &str,
        iterations: u32,
        final_decision: Option<&str>,
        result: &serde_json::Value,
    ) -> Result<()> {
        self.append(
            session_id,
            SESSION_TERMINATED,
            &serde_json::json!({
                "termination": termination,
                "final_decision": final_decision,
                "result": result,
            }),
            "coordinator",
            iterations,
        )
    }

    /// Append one event, updating the session row for lifecycle events
    pub fn append(
        &self,
        session_id: &str,
        event_type: &str,
        data: &serde_json::Value,
        actor: &str,
        iteration: u32,
    ) -> Result<()> {
        let conn = lock(&self.conn)?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO round_events (session_id, event_type, actor, iteration, data_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                session_id,
                event_type,
                actor,
                iteration,
                serde_json::to_string(data)?,
                now
            ],
        )
        .context("Failed to insert round event")?;

        match event_type {
            SESSION_STARTED => {
                let goal = data.get("goal").and_then(|g| g.as_str()).unwrap_or("");
                conn.execute(
                    r#"
                    INSERT INTO sessions (id, goal, status, created_at)
                    VALUES (?1, ?2, 'running', ?3)
                    ON CONFLICT(id) DO UPDATE SET goal = ?2
                    "#,
                    params![session_id, goal, now],
                )
                .context("Failed to open session row")?;
            }
            SESSION_TERMINATED => {
                let termination = data.get("termination").and_then(|t| t.as_str());
                let final_decision = data.get("final_decision").and_then(|d| d.as_str());
                let result_json = data.get("result").map(serde_json::to_string).transpose()?;
                conn.execute(
                    r#"
                    INSERT INTO sessions (id, goal, status, termination, iterations,
                                          final_decision, result_json, created_at, finished_at)
                    VALUES (?1, '', 'finished', ?2, ?3, ?4, ?5, ?6, ?6)
                    ON CONFLICT(id) DO UPDATE SET
                        status = 'finished',
                        termination = ?2,
                        iterations = ?3,
                        final_decision = ?4,
                        result_json = ?5,
                        finished_at = ?6
                    "#,
                    params![
                        session_id,
                        termination,
                        iteration,
                        final_decision,
                        result_json,
                        now
                    ],
                )
                .context("Failed to close session row")?;
            }
            _ => {}
        }

        Ok(())
    }

    /// List sessions, newest first
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        let conn = lock(&self.conn)?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, goal, status, termination, iterations, final_decision, created_at, finished_at
            FROM sessions
            ORDER BY created_at DESC
            LIMIT ?1
            "#,
        )?;

        let sessions = stmt
            .query_map(params![limit as i64], Self::row_to_session)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list sessions")?;

        Ok(sessions)
    }

    /// Load one session summary
    pub fn load_session(&self, id: &str) -> Result<SessionRecord> {
        let conn = lock(&self.conn)?;

        conn.query_row(
            r#"
            SELECT id, goal, status, termination, iterations, final_decision, created_at, finished_at
            FROM sessions WHERE id = ?1
            "#,
            params![id],
            Self::row_to_session,
        )
        .with_context(|| format!("Session '{}' not found", id))
    }

    /// The stored result JSON of a finished session
    pub fn load_result(&self, id: &str) -> Result<Option<serde_json::Value>> {
        let conn = lock(&self.conn)?;

        let raw: Option<String> = conn
            .query_row(
                "SELECT result_json FROM sessions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .with_context(|| format!("Session '{}' not found", id))?;

        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    /// All events of a session in round order
    pub fn events_for(&self, session_id: &str) -> Result<Vec<StoredEvent>> {
        let conn = lock(&self.conn)?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, session_id, event_type, actor, iteration, data_json, created_at
            FROM round_events
            WHERE session_id = ?1
            ORDER BY iteration ASC, id ASC
            "#,
        )?;

        let events = stmt
            .query_map(params![session_id], |row| {
                let data_json: String = row.get(5)?;
                let created_at: String = row.get(6)?;
                Ok(StoredEvent {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    event_type: row.get(2)?,
                    actor: row.get(3)?,
                    iteration: row.get(4)?,
                    data: serde_json::from_str(&data_json).unwrap_or(serde_json::Value::Null),
                    created_at: parse_time(&created_at),
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to load round events")?;

        Ok(events)
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<SessionRecord> {
        let created_at: String = row.get(6)?;
        let finished_at: Option<String> = row.get(7)?;
        Ok(SessionRecord {
            id: row.get(0)?,
            goal: row.get(1)?,
            status: row.get(2)?,
            termination: row.get(3)?,
            iterations: row.get(4)?,
            final_decision: row.get(5)?,
            created_at: parse_time(&created_at),
            finished_at: finished_at.as_deref().map(parse_time),
        })
    }
}

#[async_trait]
impl EventSink for SqliteEventSink {
    async fn log_round(
        &self,
        session_id: &str,
        event_type: &str,
        data: &serde_json::Value,
        actor: &str,
        iteration: u32,
    ) -> Result<()> {
        self.append(session_id, event_type, data, actor, iteration)
    }
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
