//! Trait abstractions for runtime I/O
//!
//! The session manager only needs these operations from persistence, which
//! lets tests run it against an in-memory store.

use crate::db::{Database, HistoryEntry};
use crate::llm::{HistoryMessage, StopReason};
use async_trait::async_trait;
use std::sync::Arc;

/// Append-only history storage.
///
/// An append must be visible to the next `read_history` of the same session.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append_history(
        &self,
        session_id: &str,
        content: &HistoryMessage,
        stop_reason: StopReason,
        node_id: &str,
    ) -> Result<HistoryEntry, String>;

    async fn read_history(&self, session_id: &str) -> Result<Vec<HistoryEntry>, String>;

    async fn update_turn_count(&self, session_id: &str, turn_count: i64) -> Result<(), String>;
}

#[async_trait]
impl<T: HistoryStore + ?Sized> HistoryStore for Arc<T> {
    async fn append_history(
        &self,
        session_id: &str,
        content: &HistoryMessage,
        stop_reason: StopReason,
        node_id: &str,
    ) -> Result<HistoryEntry, String> {
        (**self)
            .append_history(session_id, content, stop_reason, node_id)
            .await
    }

    async fn read_history(&self, session_id: &str) -> Result<Vec<HistoryEntry>, String> {
        (**self).read_history(session_id).await
    }

    async fn update_turn_count(&self, session_id: &str, turn_count: i64) -> Result<(), String> {
        (**self).update_turn_count(session_id, turn_count).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as a history store
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl HistoryStore for DatabaseStorage {
    async fn append_history(
        &self,
        session_id: &str,
        content: &HistoryMessage,
        stop_reason: StopReason,
        node_id: &str,
    ) -> Result<HistoryEntry, String> {
        let id = uuid::Uuid::now_v7().to_string();
        self.db
            .append_history(&id, session_id, content, stop_reason, node_id)
            .map_err(|e| e.to_string())
    }

    async fn read_history(&self, session_id: &str) -> Result<Vec<HistoryEntry>, String> {
        self.db.read_history(session_id).map_err(|e| e.to_string())
    }

    async fn update_turn_count(&self, session_id: &str, turn_count: i64) -> Result<(), String> {
        self.db
            .update_turn_count(session_id, turn_count)
            .map_err(|e| e.to_string())
    }
}
