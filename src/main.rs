//! Stockmind - multi-agent chat orchestration over MCP tool servers
//!
//! Drives conversational turns through a configured agent flow, streaming
//! model output to HTTP clients.

mod agent;
mod api;
mod db;
mod flow;
mod llm;
mod mcp;
mod runtime;
mod state_machine;

use api::{create_router, AppState};
use db::Database;
use flow::AgentFlowConfig;
use llm::{BackendRegistry, LlmConfig};
use runtime::{SessionService, DEFAULT_MAX_TURN_LOOPS};
use std::net::SocketAddr;
use std::path::PathBuf;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stockmind=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let db_path = env_opt("STOCKMIND_DB_PATH").unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.stockmind/stockmind.db")
    });

    let port: u16 = env_opt("STOCKMIND_PORT")
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    let max_turn_loops: usize = env_opt("STOCKMIND_MAX_TURN_LOOPS")
        .and_then(|n| n.parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MAX_TURN_LOOPS);

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %db_path, "Opening database");
    let db = Database::open(&db_path)?;

    let backends = BackendRegistry::new(&LlmConfig::from_env())?;

    let service = SessionService::new(db, backends);

    // Register a flow from disk; it becomes the default unless one is named
    let mut default_flow = env_opt("STOCKMIND_DEFAULT_FLOW");
    if let Some(path) = env_opt("STOCKMIND_FLOW_FILE") {
        let config = AgentFlowConfig::from_json(&std::fs::read_to_string(&path)?)?;
        let flow = service.create_flow("default", config)?;
        tracing::info!(path = %path, flow_id = %flow.id, "Registered flow from file");
        default_flow.get_or_insert(flow.id);
    }

    let state = AppState::new(
        service,
        env_opt("STOCKMIND_DEFAULT_USER"),
        default_flow,
        max_turn_loops,
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, max_turn_loops, "Stockmind server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    Ok(())
}
