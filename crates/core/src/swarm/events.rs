//! # Round Events
//!
//! What happened in a session, one event at a time. Events are kept on the
//! coordinator, streamed to an optional channel, and handed to the
//! persistence sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of round event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundEventKind {
    /// Session opened, episodic matches loaded
    SessionStarted,
    /// An agent contributed nothing this round
    AgentFailed,
    /// A winning proposal was applied
    RoundApplied,
    /// Ordinary eviction happened
    WorkspacePruned,
    /// Focus was truncated to get back under budget
    FocusTruncated,
    /// Session ended
    SessionTerminated,
}

impl RoundEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundEventKind::SessionStarted => "session_started",
            RoundEventKind::AgentFailed => "agent_failed",
            RoundEventKind::RoundApplied => "round_applied",
            RoundEventKind::WorkspacePruned => "workspace_pruned",
            RoundEventKind::FocusTruncated => "focus_truncated",
            RoundEventKind::SessionTerminated => "session_terminated",
        }
    }
}

/// An event in a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundEvent {
    /// Unique event ID
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: RoundEventKind,
    /// Agent (or "coordinator") responsible for this event
    pub actor: String,
    /// Workspace iteration when the event was emitted
    pub iteration: u32,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RoundEvent {
    pub fn new(session_id: &str, kind: RoundEventKind, actor: &str, iteration: u32) -> Self {
        Self {
            id: uuid_v4(),
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            kind,
            actor: actor.to_string(),
            iteration,
            data: serde_json::Value::Null,
        }
    }

    /// Add data to the event
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Generate a simple unique id (time + random suffix)
pub fn uuid_v4() -> String {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    format!("{:x}-{:x}", nanos, rand_u32())
}

/// Simple random number (not cryptographic)
fn rand_u32() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}
