//! Runtime for driving sessions
//!
//! `SessionManager` executes the steps selected by the state machine and
//! persists one history entry per step; `SessionService` builds managers
//! from stored sessions and flows.

mod service;
mod session;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use service::SessionService;
pub use session::SessionManager;

use crate::agent::AgentError;
use crate::db::DbError;
use crate::flow::ConfigError;
use crate::state_machine::TransitionError;
use thiserror::Error;

/// Default ceiling on consecutive steps per human message
pub const DEFAULT_MAX_TURN_LOOPS: usize = 10;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("Storage error: {0}")]
    Store(String),
    #[error("Not the human's turn")]
    NotHumanTurn,
    #[error("Too many loops: exceeded {limit} steps without returning to the user")]
    TooManyLoops { limit: usize },
    #[error("Cancelled")]
    Cancelled,
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
