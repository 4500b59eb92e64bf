//! Turn state machine
//!
//! The state of a session is implicit in its last history entry. The pure
//! functions here map that entry to the next step; the runtime executes the
//! step and appends the result.

pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use transition::{is_human_turn, next_step};

use crate::llm::StopReason;
use thiserror::Error;

/// Work selected for one `ContinueTurn` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Run a completion on the agent bound to `node_id`
    Complete { node_id: String, agent: String },
    /// Resolve the pending tool calls of the last entry
    ExecuteTools { node_id: String, agent: String },
}

impl Step {
    pub fn node_id(&self) -> &str {
        match self {
            Step::Complete { node_id, .. } | Step::ExecuteTools { node_id, .. } => node_id,
        }
    }

    pub fn agent(&self) -> &str {
        match self {
            Step::Complete { agent, .. } | Step::ExecuteTools { agent, .. } => agent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Cannot continue from stop reason {0}")]
    InvalidContinuation(StopReason),
    #[error("History references unknown node {0}")]
    UnknownNode(String),
    #[error("Node {0} is not bound to an agent")]
    NotAgentNode(String),
    #[error("Hand-off from {from} to agent node {to} is not supported")]
    HandoffUnsupported { from: String, to: String },
    #[error("Turn already finished at node {0}")]
    TurnAlreadyComplete(String),
}
