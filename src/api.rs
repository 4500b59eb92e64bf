//! HTTP API
//!
//! `POST /v1/chat` streams one turn as Server-Sent Events; flows are
//! registered through `POST /v1/flows`.

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::runtime::SessionService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: SessionService,
    /// Used when a chat request names no user
    pub default_user: Option<String>,
    /// Used when a chat request names no flow
    pub default_flow: Option<String>,
    pub max_turn_loops: usize,
}

impl AppState {
    pub fn new(
        service: SessionService,
        default_user: Option<String>,
        default_flow: Option<String>,
        max_turn_loops: usize,
    ) -> Self {
        Self {
            service,
            default_user,
            default_flow,
            max_turn_loops,
        }
    }
}
