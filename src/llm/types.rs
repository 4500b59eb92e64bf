//! Common types for model interactions

use crate::flow::ModelProvider;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;

/// Terminal signal of a step. Drives every turn transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    UserInput,
    ToolCall,
    ToolResult,
    AgentDone,
    MaxTokens,
    Unknown,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::UserInput => "user_input",
            StopReason::ToolCall => "tool_call",
            StopReason::ToolResult => "tool_result",
            StopReason::AgentDone => "agent_done",
            StopReason::MaxTokens => "max_tokens",
            StopReason::Unknown => "unknown",
        }
    }

    /// True while an agent is in the middle of a tool exchange
    pub fn is_tool_exchange(self) -> bool {
        matches!(self, StopReason::ToolCall | StopReason::ToolResult)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StopReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_input" => Ok(StopReason::UserInput),
            "tool_call" => Ok(StopReason::ToolCall),
            "tool_result" => Ok(StopReason::ToolResult),
            "agent_done" => Ok(StopReason::AgentDone),
            "max_tokens" => Ok(StopReason::MaxTokens),
            "unknown" => Ok(StopReason::Unknown),
            other => Err(format!("unknown stop reason: {other}")),
        }
    }
}

/// Provider-tagged message payload stored in history.
///
/// Exactly one provider representation per entry; adding a provider adds a
/// variant and every backend match must handle it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HistoryMessage {
    #[serde(rename = "of_openai")]
    OpenAI(OpenAiMessage),
}

impl HistoryMessage {
    pub fn provider(&self) -> ModelProvider {
        match self {
            HistoryMessage::OpenAI(_) => ModelProvider::OpenAI,
        }
    }

    /// Concatenated text content, for display and logging
    pub fn text(&self) -> String {
        match self {
            HistoryMessage::OpenAI(msg) => msg.text(),
        }
    }
}

/// Role of an OpenAI chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }
}

/// Content block of an OpenAI chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        /// Raw JSON arguments as streamed by the model
        arguments: String,
    },
    ToolResult {
        tool_call_id: String,
        name: String,
        content: Vec<String>,
    },
}

/// OpenAI chat message as persisted.
///
/// A tool-result step is one message holding every result of that step; it
/// is expanded to one `tool` role message per call on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiMessage {
    pub role: ChatRole,
    pub content: Vec<ContentBlock>,
}

impl OpenAiMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolCall {
                id,
                name,
                arguments,
            } => Some((id.as_str(), name.as_str(), arguments.as_str())),
            _ => None,
        })
    }
}

/// Tool offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A tool call the model asked for, in provider-neutral form
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    /// Qualified `<server>--<tool>` name
    pub name: String,
    pub arguments: Value,
}

/// Result of one tool call, matched back to its request by `call_id`
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallOutcome {
    pub call_id: String,
    pub name: String,
    pub content: Vec<String>,
}

/// Everything a backend needs to issue one completion
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub tools: Vec<ToolDescriptor>,
}

/// Accumulated result of a completion stream
#[derive(Debug, Clone)]
pub struct Completion {
    pub message: HistoryMessage,
    pub stop_reason: StopReason,
}

/// Incremental output forwarded to a live client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    TextDelta(String),
    ThinkingDelta(String),
    /// Control has returned to the human
    Complete,
    Error(String),
}

/// Ordered sink for [`StreamEvent`]s.
///
/// Backed by a bounded channel, so a slow consumer applies back-pressure on
/// the producing step. A dropped receiver turns every emit into a no-op.
#[derive(Debug, Clone, Default)]
pub struct StreamSink {
    tx: Option<mpsc::Sender<StreamEvent>>,
}

impl StreamSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that discards everything
    #[cfg(test)]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Bounded channel pair
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub async fn emit(&self, event: StreamEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                tracing::debug!("Stream receiver dropped, discarding event");
            }
        }
    }
}
