//! API request and response types

use crate::db::{AgentFlow, HistoryEntry};
use crate::flow::AgentFlowConfig;
use serde::{Deserialize, Serialize};

/// Request to send one human message
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub content: String,
    /// Continue this session; a new one is created when absent
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub flow_id: Option<String>,
    pub title: Option<String>,
}

/// Request to register an agent flow
#[derive(Debug, Deserialize)]
pub struct CreateFlowRequest {
    pub name: String,
    pub config: AgentFlowConfig,
}

/// Response with a stored flow
#[derive(Debug, Serialize)]
pub struct FlowResponse {
    pub flow: AgentFlow,
}

/// Response with a session's history
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub entries: Vec<HistoryEntry>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
