//! HTTP request handlers

use super::sse::chat_stream;
use super::types::{ChatRequest, CreateFlowRequest, ErrorResponse, FlowResponse, HistoryResponse};
use super::AppState;
use crate::db::DbError;
use crate::llm::{StreamEvent, StreamSink};
use crate::runtime::SessionError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio_util::sync::CancellationToken;

/// Buffered stream events per chat request
const STREAM_BUFFER: usize = 64;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat", post(chat))
        .route("/v1/flows", post(create_flow))
        .route("/v1/sessions/:id/history", get(get_history))
        .with_state(state)
}

// ============================================================
// Chat
// ============================================================

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, AppError> {
    if req.content.trim().is_empty() {
        return Err(AppError::BadRequest("content is required".to_string()));
    }

    let cancel = CancellationToken::new();
    let user_id = req.user_id.or_else(|| state.default_user.clone());
    let flow_id = req.flow_id.or_else(|| state.default_flow.clone());
    let mut session = state
        .service
        .get_or_create_session(
            user_id.as_deref(),
            flow_id.as_deref(),
            req.session_id.as_deref(),
            req.title.as_deref(),
            cancel.clone(),
        )
        .await?;

    if !session.is_human_turn() {
        return Err(AppError::BadRequest(
            "Session has an unfinished step".to_string(),
        ));
    }

    let session_id = session.session().id.clone();
    let (sink, events) = StreamSink::channel(STREAM_BUFFER);
    let max_loops = state.max_turn_loops;
    let content = req.content;

    tokio::spawn(async move {
        let result = session.chat(&content, max_loops, &sink).await;
        match result {
            Ok(steps) => {
                tracing::info!(session_id = %session.session().id, steps, "Turn complete");
                sink.emit(StreamEvent::Complete).await;
            }
            Err(e) => {
                tracing::warn!(session_id = %session.session().id, error = %e, "Turn failed");
                sink.emit(StreamEvent::Error(e.to_string())).await;
            }
        }
    });

    Ok(chat_stream(session_id, events, cancel).into_response())
}

// ============================================================
// Flows
// ============================================================

async fn create_flow(
    State(state): State<AppState>,
    Json(req): Json<CreateFlowRequest>,
) -> Result<Json<FlowResponse>, AppError> {
    let flow = state.service.create_flow(&req.name, req.config)?;
    Ok(Json(FlowResponse { flow }))
}

// ============================================================
// History
// ============================================================

async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let entries = state.service.history(&id)?;
    Ok(Json(HistoryResponse {
        session_id: id,
        entries,
    }))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Db(DbError::SessionNotFound(_) | DbError::FlowNotFound(_)) => {
                AppError::NotFound(e.to_string())
            }
            SessionError::Config(_)
            | SessionError::InvalidRequest(_)
            | SessionError::NotHumanTurn => AppError::BadRequest(e.to_string()),
            _ => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
