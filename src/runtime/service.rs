//! Session lookup and construction

use super::traits::DatabaseStorage;
use super::{SessionError, SessionManager};
use crate::db::{AgentFlow, Database, HistoryEntry};
use crate::flow::{AgentFlowConfig, FlowGraph};
use crate::llm::BackendRegistry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SESSION_TITLE: &str = "New Session";

/// Type alias for sessions backed by the database
pub type ProductionSession = SessionManager<DatabaseStorage>;

/// Builds session managers from stored sessions and flows
#[derive(Clone)]
pub struct SessionService {
    db: Database,
    backends: BackendRegistry,
}

impl SessionService {
    pub fn new(db: Database, backends: BackendRegistry) -> Self {
        Self { db, backends }
    }

    /// Validate and store a flow
    pub fn create_flow(&self, name: &str, config: AgentFlowConfig) -> Result<AgentFlow, SessionError> {
        let graph = FlowGraph::new(config)?;
        let id = uuid::Uuid::new_v4().to_string();
        let flow = self.db.create_flow(&id, name, graph.config())?;
        tracing::info!(flow_id = %flow.id, name = %flow.name, "Agent flow stored");
        Ok(flow)
    }

    pub fn history(&self, session_id: &str) -> Result<Vec<HistoryEntry>, SessionError> {
        self.db.get_session(session_id)?;
        Ok(self.db.read_history(session_id)?)
    }

    /// Load the session named by `session_id`, or create one for `user_id`
    /// bound to `flow_id`.
    pub async fn get_or_create_session(
        &self,
        user_id: Option<&str>,
        flow_id: Option<&str>,
        session_id: Option<&str>,
        title: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<ProductionSession, SessionError> {
        let session = match session_id {
            Some(id) => self.db.get_session(id)?,
            None => {
                let user_id = user_id
                    .ok_or_else(|| SessionError::InvalidRequest("user id is required".into()))?;
                let flow_id = flow_id
                    .ok_or_else(|| SessionError::InvalidRequest("flow id is required".into()))?;
                self.db.get_flow(flow_id)?;

                let id = uuid::Uuid::new_v4().to_string();
                let title = title.unwrap_or(DEFAULT_SESSION_TITLE);
                let session = self.db.create_session(&id, user_id, flow_id, title)?;
                tracing::info!(session_id = %session.id, user_id = %user_id, flow_id = %flow_id, "Session created");
                session
            }
        };

        let flow = self.db.get_flow(&session.flow_id)?;
        let graph = Arc::new(FlowGraph::new(flow.config)?);
        SessionManager::initialize(
            session,
            graph,
            &self.backends,
            DatabaseStorage::new(self.db.clone()),
            cancel,
        )
        .await
    }
}
