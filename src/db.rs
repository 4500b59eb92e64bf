//! Database module for stockmind
//!
//! Persists agent flows, sessions, and the append-only session history.

mod schema;

pub use schema::*;

use crate::flow::AgentFlowConfig;
use crate::llm::{HistoryMessage, StopReason};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Agent flow not found: {0}")]
    FlowNotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==================== Flow Operations ====================

    pub fn create_flow(&self, id: &str, name: &str, config: &AgentFlowConfig) -> DbResult<AgentFlow> {
        let conn = self.conn();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO agent_flows (id, name, config, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, serde_json::to_string(config)?, now.to_rfc3339()],
        )?;

        Ok(AgentFlow {
            id: id.to_string(),
            name: name.to_string(),
            config: config.clone(),
            created_at: now,
        })
    }

    pub fn get_flow(&self, id: &str) -> DbResult<AgentFlow> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, config, created_at FROM agent_flows WHERE id = ?1",
            params![id],
            |row| {
                Ok(AgentFlow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    config: parse_json_column(row, 2)?,
                    created_at: parse_datetime(&row.get::<_, String>(3)?),
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::FlowNotFound(id.to_string()),
            other => DbError::Sqlite(other),
        })
    }

    // ==================== Session Operations ====================

    pub fn create_session(&self, id: &str, user_id: &str, flow_id: &str, title: &str) -> DbResult<Session> {
        let conn = self.conn();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO sessions (id, user_id, flow_id, title, turn_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
            params![id, user_id, flow_id, title, now.to_rfc3339()],
        )?;

        Ok(Session {
            id: id.to_string(),
            user_id: user_id.to_string(),
            flow_id: flow_id.to_string(),
            title: title.to_string(),
            turn_count: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_session(&self, id: &str) -> DbResult<Session> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, user_id, flow_id, title, turn_count, created_at, updated_at
             FROM sessions WHERE id = ?1",
            params![id],
            |row| {
                Ok(Session {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    flow_id: row.get(2)?,
                    title: row.get(3)?,
                    turn_count: row.get(4)?,
                    created_at: parse_datetime(&row.get::<_, String>(5)?),
                    updated_at: parse_datetime(&row.get::<_, String>(6)?),
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::SessionNotFound(id.to_string()),
            other => DbError::Sqlite(other),
        })
    }

    pub fn update_turn_count(&self, id: &str, turn_count: i64) -> DbResult<()> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE sessions SET turn_count = ?1, updated_at = ?2 WHERE id = ?3",
            params![turn_count, Utc::now().to_rfc3339(), id],
        )?;

        if updated == 0 {
            return Err(DbError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    // ==================== History Operations ====================

    /// Append one entry; the sequence id is assigned here
    pub fn append_history(
        &self,
        id: &str,
        session_id: &str,
        content: &HistoryMessage,
        stop_reason: StopReason,
        node_id: &str,
    ) -> DbResult<HistoryEntry> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = Utc::now();

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
            params![session_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(DbError::SessionNotFound(session_id.to_string()));
        }

        let sequence_id: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM session_history WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO session_history (id, session_id, sequence_id, content, stop_reason, node_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                session_id,
                sequence_id,
                serde_json::to_string(content)?,
                stop_reason.as_str(),
                node_id,
                now.to_rfc3339(),
            ],
        )?;
        tx.execute(
            "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), session_id],
        )?;
        tx.commit()?;

        Ok(HistoryEntry {
            id: id.to_string(),
            session_id: session_id.to_string(),
            sequence_id,
            content: content.clone(),
            stop_reason,
            node_id: node_id.to_string(),
            created_at: now,
        })
    }

    /// Full history of a session in append order
    pub fn read_history(&self, session_id: &str) -> DbResult<Vec<HistoryEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, sequence_id, content, stop_reason, node_id, created_at
             FROM session_history WHERE session_id = ?1 ORDER BY sequence_id ASC",
        )?;

        let rows = stmt.query_map(params![session_id], |row| {
            let stop_reason: String = row.get(4)?;
            Ok(HistoryEntry {
                id: row.get(0)?,
                session_id: row.get(1)?,
                sequence_id: row.get(2)?,
                content: parse_json_column(row, 3)?,
                stop_reason: stop_reason.parse().map_err(|e: String| {
                    rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into())
                })?,
                node_id: row.get(5)?,
                created_at: parse_datetime(&row.get::<_, String>(6)?),
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}

fn parse_json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{AgentConfig, ModelProvider, Node};
    use crate::llm::OpenAiMessage;

    fn flow_config() -> AgentFlowConfig {
        AgentFlowConfig {
            agents: [(
                "analyst".to_string(),
                AgentConfig::new(ModelProvider::OpenAI, "test-model"),
            )]
            .into_iter()
            .collect(),
            nodes: vec![
                Node::start("start", Some("analyst")),
                Node::agent("analyst", "analyst", None),
            ],
        }
    }

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_flow("flow-1", "stock analyst", &flow_config()).unwrap();
        db.create_session("sess-1", "user-1", "flow-1", "New Session").unwrap();
        db
    }

    #[test]
    fn test_flow_round_trip() {
        let db = seeded();
        let flow = db.get_flow("flow-1").unwrap();
        assert_eq!(flow.name, "stock analyst");
        assert_eq!(flow.config, flow_config());
        assert!(matches!(db.get_flow("nope"), Err(DbError::FlowNotFound(_))));
    }

    #[test]
    fn test_create_and_get_session() {
        let db = seeded();
        let session = db.get_session("sess-1").unwrap();
        assert_eq!(session.user_id, "user-1");
        assert_eq!(session.flow_id, "flow-1");
        assert_eq!(session.turn_count, 0);

        db.update_turn_count("sess-1", 3).unwrap();
        assert_eq!(db.get_session("sess-1").unwrap().turn_count, 3);
        assert!(matches!(
            db.update_turn_count("missing", 1),
            Err(DbError::SessionNotFound(_))
        ));
        assert!(matches!(db.get_session("missing"), Err(DbError::SessionNotFound(_))));
    }

    #[test]
    fn test_session_requires_existing_flow() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.create_session("s", "u", "no-such-flow", "t"),
            Err(DbError::Sqlite(_))
        ));
    }

    #[test]
    fn test_history_is_ordered_and_immediately_visible() {
        let db = seeded();
        let first = HistoryMessage::OpenAI(OpenAiMessage::user("hello"));
        let second = HistoryMessage::OpenAI(OpenAiMessage::user("again"));

        let e1 = db
            .append_history("h1", "sess-1", &first, StopReason::UserInput, "start")
            .unwrap();
        assert_eq!(db.read_history("sess-1").unwrap().len(), 1);
        let e2 = db
            .append_history("h2", "sess-1", &second, StopReason::AgentDone, "analyst")
            .unwrap();

        assert_eq!(e1.sequence_id, 1);
        assert_eq!(e2.sequence_id, 2);

        let history = db.read_history("sess-1").unwrap();
        assert_eq!(history, vec![e1, e2]);
        assert_eq!(history[1].stop_reason, StopReason::AgentDone);
        assert_eq!(history[1].content.text(), "again");

        assert!(matches!(
            db.append_history("h3", "missing", &first, StopReason::UserInput, "start"),
            Err(DbError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stockmind.db");
        {
            let db = Database::open(&path).unwrap();
            db.create_flow("flow-1", "f", &flow_config()).unwrap();
            db.create_session("sess-1", "u", "flow-1", "t").unwrap();
            db.append_history(
                "h1",
                "sess-1",
                &HistoryMessage::OpenAI(OpenAiMessage::user("hi")),
                StopReason::UserInput,
                "start",
            )
            .unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.read_history("sess-1").unwrap().len(), 1);
    }
}
