//! Database schema and types

use crate::flow::AgentFlowConfig;
use crate::llm::{HistoryMessage, StopReason};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS agent_flows (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    config TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    flow_id TEXT NOT NULL,
    title TEXT NOT NULL,
    turn_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (flow_id) REFERENCES agent_flows(id)
);

CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id, updated_at DESC);

CREATE TABLE IF NOT EXISTS session_history (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    stop_reason TEXT NOT NULL,
    node_id TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE,
    UNIQUE (session_id, sequence_id)
);
";

/// Stored flow configuration
#[derive(Debug, Clone, Serialize)]
pub struct AgentFlow {
    pub id: String,
    pub name: String,
    pub config: AgentFlowConfig,
    pub created_at: DateTime<Utc>,
}

/// One conversation instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub flow_id: String,
    pub title: String,
    /// Number of completed steps
    pub turn_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One append-only step of a session transcript
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// Time-ordered (v7) identifier
    pub id: String,
    pub session_id: String,
    /// Position within the session, starting at 1
    pub sequence_id: i64,
    pub content: HistoryMessage,
    pub stop_reason: StopReason,
    pub node_id: String,
    pub created_at: DateTime<Utc>,
}
