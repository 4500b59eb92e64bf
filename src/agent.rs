//! Agent: one configured model bound to its own tool servers

use crate::flow::{AgentConfig, ConfigError, ModelProvider};
use crate::llm::{
    BackendRegistry, Completion, CompletionRequest, HistoryMessage, LlmError, ModelBackend,
    StreamSink, ToolCallOutcome, ToolDescriptor,
};
use crate::mcp::{CallerContext, DispatchError, McpError, ToolRegistry};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Connection(#[from] McpError),
    #[error("Completion failed: {0}")]
    Provider(#[from] LlmError),
    #[error("No tool calls found in the last message")]
    NoToolCallsFound,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("Agent uses {expected} but history holds a {found} message")]
    ProviderMismatch {
        expected: ModelProvider,
        found: ModelProvider,
    },
}

/// Runtime agent.
///
/// Owns its tool registry exclusively; the backend is shared across
/// sessions since it keeps no per-call state.
pub struct Agent {
    name: String,
    config: AgentConfig,
    backend: Arc<dyn ModelBackend>,
    tools: ToolRegistry,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        config: AgentConfig,
        backend: Arc<dyn ModelBackend>,
        tools: ToolRegistry,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            backend,
            tools,
        }
    }

    /// Select the backend for the configured provider and connect every
    /// configured tool server
    pub async fn connect(
        name: &str,
        config: AgentConfig,
        backends: &BackendRegistry,
        cancel: &CancellationToken,
    ) -> Result<Self, AgentError> {
        let backend = backends.get(config.provider)?;
        let tools = ToolRegistry::connect(&config.mcp_servers, cancel).await?;
        tracing::info!(
            agent = %name,
            provider = %config.provider,
            model = %config.model_id,
            servers = ?tools.server_names().collect::<Vec<_>>(),
            tool_count = tools.all_tools().len(),
            "Agent initialized"
        );
        Ok(Self::new(name, config, backend, tools))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &Arc<dyn ModelBackend> {
        &self.backend
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Tools offered to the model, filtered by the configured allow-list
    pub fn offered_tools(&self) -> Vec<ToolDescriptor> {
        self.tools
            .all_tools()
            .iter()
            .filter(|t| self.config.tools.is_empty() || self.config.tools.contains(&t.name))
            .cloned()
            .collect()
    }

    fn check_provider(&self, message: &HistoryMessage) -> Result<(), AgentError> {
        let expected = self.backend.provider();
        let found = message.provider();
        if expected == found {
            Ok(())
        } else {
            Err(AgentError::ProviderMismatch { expected, found })
        }
    }

    pub async fn run_completion(
        &self,
        history: &[HistoryMessage],
        sink: &StreamSink,
        cancel: &CancellationToken,
    ) -> Result<Completion, AgentError> {
        for message in history {
            self.check_provider(message)?;
        }

        let request = CompletionRequest {
            model: self.config.model_id.clone(),
            system_prompt: self.config.system_prompt.clone(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            top_k: self.config.top_k,
            tools: self.offered_tools(),
        };

        tracing::debug!(
            agent = %self.name,
            history_len = history.len(),
            tool_count = request.tools.len(),
            "Running completion"
        );
        Ok(self.backend.complete(&request, history, sink, cancel).await?)
    }

    /// Resolve every tool call of `last` into one tool-result message.
    ///
    /// All names are checked before anything is invoked, and any failure
    /// fails the whole step.
    pub async fn execute_tools(
        &self,
        last: &HistoryMessage,
        caller: &CallerContext,
        cancel: &CancellationToken,
    ) -> Result<HistoryMessage, AgentError> {
        self.check_provider(last)?;

        let calls = self.backend.pending_tool_calls(last)?;
        if calls.is_empty() {
            return Err(AgentError::NoToolCallsFound);
        }
        for call in &calls {
            self.tools.resolve(&call.name)?;
        }

        let mut outcomes = Vec::with_capacity(calls.len());
        for call in calls {
            let start = std::time::Instant::now();
            let result = self
                .tools
                .dispatch(&call.name, call.arguments, caller, cancel)
                .await?;

            if result.is_error {
                tracing::warn!(agent = %self.name, tool = %call.name, "Tool reported an error");
            }
            tracing::info!(
                agent = %self.name,
                tool = %call.name,
                duration_ms = %start.elapsed().as_millis(),
                "Tool call finished"
            );

            outcomes.push(ToolCallOutcome {
                call_id: call.id,
                name: call.name,
                content: result.content,
            });
        }

        Ok(self.backend.tool_results_message(outcomes))
    }
}
