//! `OpenAI`-compatible streaming backend (`OpenAI`, `OpenRouter`)

use super::sse::SseParser;
use super::types::{
    ChatRole, Completion, CompletionRequest, ContentBlock, HistoryMessage, OpenAiMessage,
    StopReason, StreamEvent, StreamSink, ToolCallOutcome, ToolCallRequest,
};
use super::{LlmError, ModelBackend};
use crate::flow::ModelProvider;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Streaming chat-completions client.
///
/// Stateless per call; one instance is shared by every agent and session
/// using the `openai` provider.
pub struct OpenAIBackend {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl OpenAIBackend {
    pub fn new(api_key: String, base_url: &str) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
        })
    }

    fn translate_request(request: &CompletionRequest, history: &[HistoryMessage]) -> OpenAIRequest {
        let mut messages = Vec::new();

        if !request.system_prompt.is_empty() {
            messages.push(OpenAIMessage::text("system", request.system_prompt.clone()));
        }

        for message in history {
            match message {
                HistoryMessage::OpenAI(msg) => messages.extend(Self::translate_message(msg)),
            }
        }

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| OpenAITool {
                        r#type: "function".to_string(),
                        function: OpenAIFunction {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.input_schema.clone(),
                        },
                    })
                    .collect(),
            )
        };

        // Zero means "provider default", the way the stored configs are written
        OpenAIRequest {
            model: request.model.clone(),
            messages,
            tools,
            max_tokens: (request.max_tokens > 0).then_some(request.max_tokens),
            temperature: (request.temperature > 0.0).then_some(request.temperature),
            top_p: (request.top_p > 0.0).then_some(request.top_p),
            top_k: (request.top_k > 0).then_some(request.top_k),
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        }
    }

    /// Translate a stored message to `OpenAI` format.
    /// Returns a Vec because tool results need separate messages with role "tool".
    fn translate_message(msg: &OpenAiMessage) -> Vec<OpenAIMessage> {
        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        let mut messages = Vec::new();

        for block in &msg.content {
            match block {
                ContentBlock::Text { text } => text_parts.push(text.as_str()),
                ContentBlock::ToolCall {
                    id,
                    name,
                    arguments,
                } => tool_calls.push(OpenAIToolCall {
                    id: id.clone(),
                    r#type: "function".to_string(),
                    function: OpenAIFunctionCall {
                        name: name.clone(),
                        arguments: if arguments.is_empty() {
                            "{}".to_string()
                        } else {
                            arguments.clone()
                        },
                    },
                }),
                ContentBlock::ToolResult {
                    tool_call_id,
                    name,
                    content,
                } => messages.push(OpenAIMessage {
                    role: ChatRole::Tool.as_str().to_string(),
                    content: Some(content.join("\n")),
                    tool_calls: None,
                    tool_call_id: Some(tool_call_id.clone()),
                    name: Some(name.clone()),
                }),
            }
        }

        if !text_parts.is_empty() || !tool_calls.is_empty() {
            messages.insert(
                0,
                OpenAIMessage {
                    role: msg.role.as_str().to_string(),
                    content: (!text_parts.is_empty()).then(|| text_parts.concat()),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: None,
                    name: None,
                },
            );
        }

        // Edge case: empty message (shouldn't happen, but handle gracefully)
        if messages.is_empty() {
            messages.push(OpenAIMessage::text(msg.role.as_str(), String::new()));
        }

        messages
    }

    async fn read_stream(
        response: reqwest::Response,
        sink: &StreamSink,
        cancel: &CancellationToken,
    ) -> Result<Completion, LlmError> {
        let mut stream = response.bytes_stream();
        let mut parser = SseParser::default();
        let mut acc = StreamAccumulator::default();

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(LlmError::cancelled().with_partial_stop_reason(acc.stop_reason()));
                }
                next = stream.next() => next,
            };
            let Some(bytes) = next else { break };
            let bytes = bytes.map_err(|e| {
                LlmError::network(format!("Stream interrupted: {e}"))
                    .with_partial_stop_reason(acc.stop_reason())
            })?;

            for payload in parser.feed(&bytes) {
                if acc.apply_payload(&payload, sink, cancel).await? {
                    return Ok(acc.finish());
                }
            }
        }

        if let Some(payload) = parser.finish() {
            acc.apply_payload(&payload, sink, cancel).await?;
        }
        Ok(acc.finish())
    }
}

#[async_trait]
impl ModelBackend for OpenAIBackend {
    fn provider(&self) -> ModelProvider {
        ModelProvider::OpenAI
    }

    fn user_message(&self, text: &str) -> HistoryMessage {
        HistoryMessage::OpenAI(OpenAiMessage::user(text))
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        history: &[HistoryMessage],
        sink: &StreamSink,
        cancel: &CancellationToken,
    ) -> Result<Completion, LlmError> {
        let body = Self::translate_request(request, history);

        let send = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(LlmError::cancelled()),
            response = send => response.map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OpenAIErrorResponse>(&body)
                .map_or(body, |e| e.error.message);
            return Err(LlmError::from_status(status.as_u16(), &message));
        }

        Self::read_stream(response, sink, cancel).await
    }

    fn pending_tool_calls(&self, message: &HistoryMessage) -> Result<Vec<ToolCallRequest>, LlmError> {
        match message {
            HistoryMessage::OpenAI(msg) => msg
                .tool_calls()
                .map(|(id, name, arguments)| {
                    Ok(ToolCallRequest {
                        id: id.to_string(),
                        name: name.to_string(),
                        arguments: parse_arguments(name, arguments)?,
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

/// Empty arguments mean no arguments; anything else must be valid JSON
fn parse_arguments(tool: &str, arguments: &str) -> Result<serde_json::Value, LlmError> {
    if arguments.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(arguments).map_err(|e| {
        tracing::warn!(tool = %tool, error = %e, arguments = %arguments, "Malformed tool call arguments");
        LlmError::invalid_request(format!("Malformed arguments for tool {tool}: {e}"))
    })
}

/// Map the provider finish signal to a stop reason
pub fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "length" => StopReason::MaxTokens,
        "tool_calls" | "function_call" => StopReason::ToolCall,
        "stop" => StopReason::AgentDone,
        _ => StopReason::Unknown,
    }
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds streamed deltas into one assistant message
#[derive(Debug, Default)]
struct StreamAccumulator {
    text: String,
    tool_calls: BTreeMap<u32, PartialToolCall>,
    finish_reason: Option<String>,
}

impl StreamAccumulator {
    /// Apply one SSE payload. Returns true once the stream is done.
    async fn apply_payload(
        &mut self,
        payload: &str,
        sink: &StreamSink,
        cancel: &CancellationToken,
    ) -> Result<bool, LlmError> {
        if payload.trim() == "[DONE]" {
            return Ok(true);
        }
        let chunk: StreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, payload = %payload, "Skipping unparsable stream chunk");
                return Ok(false);
            }
        };
        for event in self.apply(chunk)? {
            // A consumer that stops reading must not hold the step past cancellation
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(LlmError::cancelled().with_partial_stop_reason(self.stop_reason()));
                }
                () = sink.emit(event) => {}
            }
        }
        Ok(false)
    }

    fn apply(&mut self, chunk: StreamChunk) -> Result<Vec<StreamEvent>, LlmError> {
        if let Some(error) = chunk.error {
            return Err(LlmError::server_error(format!("Stream error: {}", error.message))
                .with_partial_stop_reason(self.stop_reason()));
        }
        if let Some(usage) = chunk.usage {
            tracing::debug!(
                input_tokens = usage.prompt_tokens,
                output_tokens = usage.completion_tokens,
                "Completion usage"
            );
        }

        let mut events = Vec::new();
        for choice in chunk.choices {
            let delta = choice.delta.unwrap_or_default();
            if let Some(thinking) = delta.reasoning.or(delta.reasoning_content) {
                if !thinking.is_empty() {
                    events.push(StreamEvent::ThinkingDelta(thinking));
                }
            }
            if let Some(text) = delta.content {
                if !text.is_empty() {
                    self.text.push_str(&text);
                    events.push(StreamEvent::TextDelta(text));
                }
            }
            for call in delta.tool_calls.unwrap_or_default() {
                let entry = self.tool_calls.entry(call.index).or_default();
                if let Some(id) = call.id {
                    entry.id = id;
                }
                if let Some(function) = call.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
        }
        Ok(events)
    }

    fn stop_reason(&self) -> Option<StopReason> {
        self.finish_reason.as_deref().map(map_finish_reason)
    }

    fn finish(self) -> Completion {
        let stop_reason = self.stop_reason().unwrap_or(StopReason::Unknown);
        let mut content = Vec::new();
        if !self.text.is_empty() {
            content.push(ContentBlock::Text { text: self.text });
        }
        for (index, call) in self.tool_calls {
            if call.name.is_empty() {
                continue;
            }
            content.push(ContentBlock::ToolCall {
                id: if call.id.is_empty() {
                    format!("call_{index}")
                } else {
                    call.id
                },
                name: call.name,
                arguments: call.arguments,
            });
        }

        Completion {
            message: HistoryMessage::OpenAI(OpenAiMessage {
                role: ChatRole::Assistant,
                content,
            }),
            stop_reason,
        }
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl OpenAIMessage {
    fn text(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    r#type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct OpenAIToolCall {
    id: String,
    r#type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
    #[serde(default)]
    error: Option<OpenAIError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    /// `OpenRouter` reasoning tokens
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}
