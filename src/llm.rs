//! Completion backends
//!
//! One backend per provider. A backend owns the provider-specific message
//! format end to end: building the human message, streaming a completion,
//! reading tool calls back out of a stored reply, and packing tool results.

mod error;
mod openai;
mod registry;
pub(crate) mod sse;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use openai::{OpenAIBackend, OPENAI_BASE_URL, OPENROUTER_BASE_URL};
pub use registry::{BackendRegistry, LlmConfig};
pub use types::*;

use crate::flow::ModelProvider;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Provider-specific completion driver
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn provider(&self) -> ModelProvider;

    /// Wrap human text in this provider's message format
    fn user_message(&self, text: &str) -> HistoryMessage;

    /// Stream one completion over `history`.
    ///
    /// Text and reasoning deltas are pushed to `sink` in arrival order. The
    /// returned message holds the accumulated text and tool calls.
    async fn complete(
        &self,
        request: &CompletionRequest,
        history: &[HistoryMessage],
        sink: &StreamSink,
        cancel: &CancellationToken,
    ) -> Result<Completion, LlmError>;

    /// Tool calls carried by a stored assistant message.
    ///
    /// Fails when any call's arguments are not valid JSON.
    fn pending_tool_calls(&self, message: &HistoryMessage) -> Result<Vec<ToolCallRequest>, LlmError>;

    /// Pack all results of one tool step into a single message
    fn tool_results_message(&self, outcomes: Vec<ToolCallOutcome>) -> HistoryMessage;
}

/// Logging wrapper for backends
pub struct LoggingBackend {
    inner: Arc<dyn ModelBackend>,
}

impl LoggingBackend {
    pub fn new(inner: Arc<dyn ModelBackend>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ModelBackend for LoggingBackend {
    fn provider(&self) -> ModelProvider {
        self.inner.provider()
    }

    fn user_message(&self, text: &str) -> HistoryMessage {
        self.inner.user_message(text)
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        history: &[HistoryMessage],
        sink: &StreamSink,
        cancel: &CancellationToken,
    ) -> Result<Completion, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.complete(request, history, sink, cancel).await;
        let duration = start.elapsed();

        match &result {
            Ok(completion) => {
                tracing::info!(
                    provider = %self.inner.provider(),
                    model = %request.model,
                    duration_ms = %duration.as_millis(),
                    stop_reason = %completion.stop_reason,
                    "Completion finished"
                );
            }
            Err(e) => {
                tracing::error!(
                    provider = %self.inner.provider(),
                    model = %request.model,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    partial_stop_reason = ?e.partial_stop_reason,
                    "Completion failed"
                );
            }
        }

        result
    }

    fn pending_tool_calls(&self, message: &HistoryMessage) -> Result<Vec<ToolCallRequest>, LlmError> {
        self.inner.pending_tool_calls(message)
    }

    fn tool_results_message(&self, outcomes: Vec<ToolCallOutcome>) -> HistoryMessage {
        self.inner.tool_results_message(outcomes)
    }
}
