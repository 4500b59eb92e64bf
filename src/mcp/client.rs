//! Connected MCP client

use super::transport::{HttpTransport, StdioTransport, Transport};
use super::types::{
    CallMeta, CallToolParams, CallToolResult, ClientInfo, ContentBlock, InitializeParams,
    InitializeResult, ListToolsResult, PROTOCOL_VERSION,
};
use super::{CallerContext, McpError, ToolProvider, ToolResult};
use crate::flow::{McpConfig, McpProtocol};
use crate::llm::ToolDescriptor;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// A tool server after a successful handshake.
///
/// The connection is never re-established; a broken pipe or HTTP failure
/// surfaces as [`McpError::Invocation`] on the next call.
pub struct McpClient {
    name: String,
    transport: Box<dyn Transport>,
}

impl McpClient {
    pub async fn connect(config: &McpConfig, cancel: &CancellationToken) -> Result<Self, McpError> {
        let transport: Box<dyn Transport> = match config.protocol {
            McpProtocol::Stdio => Box::new(StdioTransport::spawn(config)?),
            McpProtocol::StreamableHttp => Box::new(HttpTransport::new(config)?),
        };
        let client = Self {
            name: config.name.clone(),
            transport,
        };

        match client.initialize(cancel).await {
            Ok(()) => Ok(client),
            Err(McpError::Cancelled) => Err(McpError::Cancelled),
            Err(e) => Err(McpError::Connection(format!(
                "{}: handshake failed: {e}",
                config.name
            ))),
        }
    }

    async fn initialize(&self, cancel: &CancellationToken) -> Result<(), McpError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION,
            capabilities: json!({}),
            client_info: ClientInfo {
                name: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
            },
        };
        let params = serde_json::to_value(params).map_err(|e| McpError::Protocol(e.to_string()))?;
        let result: InitializeResult = self.request("initialize", params, cancel).await?;

        tracing::info!(
            server = %self.name,
            remote = result.server_info.as_ref().map_or("", |s| s.name.as_str()),
            protocol_version = %result.protocol_version,
            "Tool server initialized"
        );

        self.transport
            .notify("notifications/initialized", Value::Null)
            .await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<T, McpError> {
        let value = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(McpError::Cancelled),
            result = self.transport.request(method, params) => result?,
        };
        serde_json::from_value(value)
            .map_err(|e| McpError::Protocol(format!("{method}: unexpected result: {e}")))
    }
}

#[async_trait]
impl ToolProvider for McpClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self, cancel: &CancellationToken) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let page: ListToolsResult = self.request("tools/list", params, cancel).await?;
            tools.extend(page.tools.into_iter().map(|t| ToolDescriptor {
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            }));

            match page.next_cursor {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        tracing::debug!(server = %self.name, tool_count = tools.len(), "Fetched tools");
        Ok(tools)
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        caller: &CallerContext,
        cancel: &CancellationToken,
    ) -> Result<ToolResult, McpError> {
        let params = CallToolParams {
            name: tool,
            arguments,
            meta: CallMeta {
                user_id: &caller.user_id,
                session_id: &caller.session_id,
            },
        };
        let params = serde_json::to_value(params).map_err(|e| McpError::Protocol(e.to_string()))?;
        let result: CallToolResult = self.request("tools/call", params, cancel).await?;

        let content = result
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect();

        Ok(ToolResult {
            content,
            is_error: result.is_error.unwrap_or(false),
        })
    }
}
