//! Per-agent tool namespace

use super::{CallerContext, DispatchError, McpClient, McpError, ToolProvider, ToolResult};
use crate::flow::McpConfig;
use crate::llm::ToolDescriptor;
use serde_json::Value;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

pub const TOOL_NAME_SEPARATOR: &str = "--";

/// Split a qualified `<server>--<tool>` name on the first separator
pub fn parse_qualified_name(name: &str) -> Result<(&str, &str), DispatchError> {
    match name.split_once(TOOL_NAME_SEPARATOR) {
        Some((server, tool)) if !server.is_empty() && !tool.is_empty() => Ok((server, tool)),
        _ => Err(DispatchError::MalformedName(name.to_string())),
    }
}

/// Tool servers of one agent, exclusively owned.
///
/// Tools are exposed under qualified names so two servers may offer a tool
/// with the same name.
pub struct ToolRegistry {
    providers: Vec<Box<dyn ToolProvider>>,
    by_name: HashMap<String, usize>,
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self {
            providers: Vec::new(),
            by_name: HashMap::new(),
            tools: Vec::new(),
        }
    }

    /// Connect one client per distinct server name, in configuration order
    pub async fn connect(configs: &[McpConfig], cancel: &CancellationToken) -> Result<Self, McpError> {
        let mut providers: Vec<Box<dyn ToolProvider>> = Vec::with_capacity(configs.len());
        for config in configs {
            if providers.iter().any(|p| p.name() == config.name) {
                tracing::debug!(server = %config.name, "Skipping duplicate tool server");
                continue;
            }
            providers.push(Box::new(McpClient::connect(config, cancel).await?));
        }
        Self::from_providers(providers, cancel).await
    }

    /// Build from already connected providers and fetch their tool lists
    pub async fn from_providers(
        providers: Vec<Box<dyn ToolProvider>>,
        cancel: &CancellationToken,
    ) -> Result<Self, McpError> {
        let mut registry = Self::empty();

        for provider in providers {
            let server = provider.name().to_string();
            if registry.by_name.contains_key(&server) {
                tracing::debug!(server = %server, "Skipping duplicate tool server");
                continue;
            }

            let tools = provider.list_tools(cancel).await?;
            tracing::info!(server = %server, tool_count = tools.len(), "Tool server connected");
            registry.tools.extend(tools.into_iter().map(|tool| ToolDescriptor {
                name: format!("{server}{TOOL_NAME_SEPARATOR}{}", tool.name),
                ..tool
            }));

            registry.by_name.insert(server, registry.providers.len());
            registry.providers.push(provider);
        }

        Ok(registry)
    }

    /// Every tool under its qualified name, in server then listing order
    pub fn all_tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn server_names(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|p| p.name())
    }

    fn route<'a>(&self, qualified_name: &'a str) -> Result<(&dyn ToolProvider, &'a str), DispatchError> {
        let (server, tool) = parse_qualified_name(qualified_name)?;
        let provider = self
            .by_name
            .get(server)
            .map(|&i| self.providers[i].as_ref())
            .ok_or_else(|| DispatchError::UnknownServer(server.to_string()))?;
        Ok((provider, tool))
    }

    /// Check that a qualified name routes to a connected server
    pub fn resolve(&self, qualified_name: &str) -> Result<(), DispatchError> {
        self.route(qualified_name).map(drop)
    }

    pub async fn dispatch(
        &self,
        qualified_name: &str,
        arguments: Value,
        caller: &CallerContext,
        cancel: &CancellationToken,
    ) -> Result<ToolResult, DispatchError> {
        let (provider, tool) = self.route(qualified_name)?;

        tracing::debug!(server = %provider.name(), tool = %tool, "Dispatching tool call");
        provider
            .call_tool(tool, arguments, caller, cancel)
            .await
            .map_err(|source| DispatchError::Invocation {
                tool: qualified_name.to_string(),
                source,
            })
    }
}
