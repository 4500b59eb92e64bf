//! Tool servers reached over the Model Context Protocol
//!
//! `McpClient` speaks JSON-RPC to one server over a child process pipe or
//! streamable HTTP. `ToolRegistry` owns the clients of one agent and
//! namespaces their tools as `<server>--<tool>`.

mod client;
mod registry;
mod transport;
mod types;

pub use client::McpClient;
pub use registry::ToolRegistry;

use crate::llm::ToolDescriptor;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum McpError {
    /// Server could not be started or refused the handshake
    #[error("Connection to tool server failed: {0}")]
    Connection(String),
    /// Transport or JSON-RPC failure on an established connection
    #[error("Tool invocation failed: {0}")]
    Invocation(String),
    #[error("Malformed message from tool server: {0}")]
    Protocol(String),
    #[error("Tool call cancelled")]
    Cancelled,
}

/// Failure to route or run a qualified tool call
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid tool name {0}, expected <server>--<tool>")]
    MalformedName(String),
    #[error("No tool server named {0}")]
    UnknownServer(String),
    #[error("Tool {tool} failed: {source}")]
    Invocation {
        tool: String,
        #[source]
        source: McpError,
    },
}

/// Identity forwarded to tool servers for auditing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub user_id: String,
    pub session_id: String,
}

/// Text content returned by one tool call
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolResult {
    pub content: Vec<String>,
    pub is_error: bool,
}

/// One connected tool server
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Server name used as the qualified-name prefix
    fn name(&self) -> &str;

    /// Tools under their unqualified names
    async fn list_tools(&self, cancel: &CancellationToken) -> Result<Vec<ToolDescriptor>, McpError>;

    async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        caller: &CallerContext,
        cancel: &CancellationToken,
    ) -> Result<ToolResult, McpError>;
}
