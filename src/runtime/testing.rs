//! Mock implementations for testing
//!
//! These mocks enable session and agent tests without network access.

use super::traits::HistoryStore;
use crate::db::HistoryEntry;
use crate::flow::{AgentConfig, AgentFlowConfig, FlowGraph, ModelProvider, Node};
use crate::llm::{
    ChatRole, Completion, CompletionRequest, ContentBlock, HistoryMessage, LlmError,
    ModelBackend, OpenAiMessage, StopReason, StreamEvent, StreamSink, ToolCallOutcome,
    ToolCallRequest, ToolDescriptor,
};
use crate::mcp::{CallerContext, McpError, ToolProvider, ToolResult};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Message Helpers
// ============================================================================

pub fn assistant_text(text: &str) -> HistoryMessage {
    HistoryMessage::OpenAI(OpenAiMessage {
        role: ChatRole::Assistant,
        content: vec![ContentBlock::Text { text: text.into() }],
    })
}

/// Assistant message carrying `(call id, qualified name, arguments)` calls
pub fn assistant_tool_calls(calls: &[(&str, &str, Value)]) -> HistoryMessage {
    HistoryMessage::OpenAI(OpenAiMessage {
        role: ChatRole::Assistant,
        content: calls
            .iter()
            .map(|(id, name, args)| ContentBlock::ToolCall {
                id: (*id).to_string(),
                name: (*name).to_string(),
                arguments: args.to_string(),
            })
            .collect(),
    })
}

/// `start -> analyst` flow with one agent
pub fn single_agent_graph() -> FlowGraph {
    FlowGraph::new(AgentFlowConfig {
        agents: HashMap::from([(
            "analyst".to_string(),
            AgentConfig::new(ModelProvider::OpenAI, "test-model"),
        )]),
        nodes: vec![
            Node::start("start", Some("analyst")),
            Node::agent("analyst", "analyst", None),
        ],
    })
    .unwrap()
}

// ============================================================================
// Mock Backend
// ============================================================================

/// Backend that returns queued completions
pub struct MockBackend {
    completions: Mutex<VecDeque<Result<Completion, LlmError>>>,
    /// Returned once the queue is empty
    fallback: Mutex<Option<Completion>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            completions: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_text(&self, text: &str, stop_reason: StopReason) {
        self.completions.lock().unwrap().push_back(Ok(Completion {
            message: assistant_text(text),
            stop_reason,
        }));
    }

    pub fn queue_tool_calls(&self, calls: &[(&str, &str, Value)]) {
        self.completions.lock().unwrap().push_back(Ok(Completion {
            message: assistant_tool_calls(calls),
            stop_reason: StopReason::ToolCall,
        }));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.completions.lock().unwrap().push_back(Err(error));
    }

    /// Answer every unqueued request with the same tool call
    pub fn always_tool_call(&self, name: &str) {
        *self.fallback.lock().unwrap() = Some(Completion {
            message: assistant_tool_calls(&[("call_loop", name, json!({}))]),
            stop_reason: StopReason::ToolCall,
        });
    }

    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    fn provider(&self) -> ModelProvider {
        ModelProvider::OpenAI
    }

    fn user_message(&self, text: &str) -> HistoryMessage {
        HistoryMessage::OpenAI(OpenAiMessage::user(text))
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        _history: &[HistoryMessage],
        sink: &StreamSink,
        cancel: &CancellationToken,
    ) -> Result<Completion, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::cancelled());
        }
        self.requests.lock().unwrap().push(request.clone());

        let next = self.completions.lock().unwrap().pop_front();
        let result = match next {
            Some(result) => result,
            None => self
                .fallback
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| LlmError::network("No mock response queued")),
        };

        if let Ok(completion) = &result {
            let text = completion.message.text();
            if !text.is_empty() {
                sink.emit(StreamEvent::TextDelta(text)).await;
            }
        }
        result
    }

    fn pending_tool_calls(&self, message: &HistoryMessage) -> Result<Vec<ToolCallRequest>, LlmError> {
        match message {
            HistoryMessage::OpenAI(msg) => msg
                .tool_calls()
                .map(|(id, name, args)| {
                    let arguments = if args.trim().is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(args).map_err(|e| {
                            LlmError::invalid_request(format!("Malformed arguments for tool {name}: {e}"))
                        })?
                    };
                    Ok(ToolCallRequest {
                        id: id.to_string(),
                        name: name.to_string(),
                        arguments,
                    })
                })
                .collect(),
        }
    }

    fn tool_results_message(&self, outcomes: Vec<ToolCallOutcome>) -> HistoryMessage {
        HistoryMessage::OpenAI(OpenAiMessage {
            role: ChatRole::Tool,
            content: outcomes
                .into_iter()
                .map(|o| ContentBlock::ToolResult {
                    tool_call_id: o.call_id,
                    name: o.name,
                    content: o.content,
                })
                .collect(),
        })
    }
}

// ============================================================================
// Mock Tool Provider
// ============================================================================

type CallLog = Arc<Mutex<Vec<(String, Value)>>>;

/// Tool server with canned outputs
pub struct MockToolProvider {
    name: String,
    tools: Vec<ToolDescriptor>,
    outputs: HashMap<String, Result<String, String>>,
    calls: CallLog,
    callers: Arc<Mutex<Vec<CallerContext>>>,
}

impl MockToolProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tools: Vec::new(),
            outputs: HashMap::new(),
            calls: Arc::default(),
            callers: Arc::default(),
        }
    }

    fn descriptor(tool: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: tool.to_string(),
            description: format!("mock {tool}"),
            input_schema: json!({"type": "object"}),
        }
    }

    #[must_use]
    pub fn with_tool(mut self, tool: &str, output: &str) -> Self {
        self.tools.push(Self::descriptor(tool));
        self.outputs.insert(tool.to_string(), Ok(output.to_string()));
        self
    }

    #[must_use]
    pub fn with_failing_tool(mut self, tool: &str) -> Self {
        self.tools.push(Self::descriptor(tool));
        self.outputs
            .insert(tool.to_string(), Err(format!("{tool} is broken")));
        self
    }

    /// Shared log of `(tool, arguments)` invocations
    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    pub fn callers(&self) -> Arc<Mutex<Vec<CallerContext>>> {
        self.callers.clone()
    }
}

#[async_trait]
impl ToolProvider for MockToolProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self, _cancel: &CancellationToken) -> Result<Vec<ToolDescriptor>, McpError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        caller: &CallerContext,
        cancel: &CancellationToken,
    ) -> Result<ToolResult, McpError> {
        if cancel.is_cancelled() {
            return Err(McpError::Cancelled);
        }
        self.calls.lock().unwrap().push((tool.to_string(), arguments));
        self.callers.lock().unwrap().push(caller.clone());

        match self.outputs.get(tool) {
            Some(Ok(output)) => Ok(ToolResult {
                content: vec![output.clone()],
                is_error: false,
            }),
            Some(Err(message)) => Err(McpError::Invocation(message.clone())),
            None => Err(McpError::Invocation(format!("unknown tool {tool}"))),
        }
    }
}

// ============================================================================
// In-Memory Storage
// ============================================================================

/// History store backed by a Vec
#[derive(Default)]
pub struct InMemoryStorage {
    entries: Mutex<Vec<HistoryEntry>>,
    turn_counts: Mutex<HashMap<String, i64>>,
    fail_appends: Mutex<bool>,
    fail_turn_count: Mutex<bool>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn turn_count(&self, session_id: &str) -> Option<i64> {
        self.turn_counts.lock().unwrap().get(session_id).copied()
    }

    pub fn set_fail_appends(&self, fail: bool) {
        *self.fail_appends.lock().unwrap() = fail;
    }

    pub fn set_fail_turn_count(&self, fail: bool) {
        *self.fail_turn_count.lock().unwrap() = fail;
    }
}

#[async_trait]
impl HistoryStore for InMemoryStorage {
    async fn append_history(
        &self,
        session_id: &str,
        content: &HistoryMessage,
        stop_reason: StopReason,
        node_id: &str,
    ) -> Result<HistoryEntry, String> {
        if *self.fail_appends.lock().unwrap() {
            return Err("storage unavailable".to_string());
        }
        let mut entries = self.entries.lock().unwrap();
        let prior = entries.iter().filter(|e| e.session_id == session_id).count();
        let sequence_id = i64::try_from(prior).unwrap() + 1;
        let entry = HistoryEntry {
            id: uuid::Uuid::now_v7().to_string(),
            session_id: session_id.to_string(),
            sequence_id,
            content: content.clone(),
            stop_reason,
            node_id: node_id.to_string(),
            created_at: Utc::now(),
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn read_history(&self, session_id: &str) -> Result<Vec<HistoryEntry>, String> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn update_turn_count(&self, session_id: &str, turn_count: i64) -> Result<(), String> {
        if *self.fail_turn_count.lock().unwrap() {
            return Err("turn count write failed".to_string());
        }
        self.turn_counts
            .lock()
            .unwrap()
            .insert(session_id.to_string(), turn_count);
        Ok(())
    }
}
