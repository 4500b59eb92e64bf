//! Agent flow configuration
//!
//! The static description of a conversation: which agents exist, how they are
//! tuned, which tool servers they may reach, and the chain of nodes a human
//! message travels through.

mod graph;

pub use graph::FlowGraph;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while loading or validating a flow configuration.
///
/// Always fatal: a flow that fails validation never runs a turn.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid flow JSON: {0}")]
    Json(String),
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),
    #[error("Flow has no start node")]
    MissingStart,
    #[error("Flow has more than one start node: {0} and {1}")]
    MultipleStart(String, String),
    #[error("Start node {0} must not be bound to an agent")]
    StartWithAgent(String),
    #[error("Agent node {0} has no agent name")]
    AgentNodeWithoutAgent(String),
    #[error("Node {node} references unknown agent {agent}")]
    UnknownAgent { node: String, agent: String },
    #[error("Node {node} points to unknown successor {next}")]
    DanglingSuccessor { node: String, next: String },
    #[error("Start node {0} must be followed by an agent node")]
    StartWithoutAgentSuccessor(String),
    #[error("MCP server {0}: stdio protocol requires a command")]
    StdioWithoutCommand(String),
    #[error("MCP server {0}: streamablehttp protocol requires a url")]
    HttpWithoutUrl(String),
    #[error("No backend registered for provider {0}")]
    ProviderUnavailable(ModelProvider),
}

/// Kind of flow node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    Agent,
}

/// Output formatting of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeOutputType {
    Text,
    Structured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeContentRole {
    User,
    System,
    Assistant,
}

/// Output descriptor attached to a node. Carried through for the hand-off
/// between agents; not interpreted by the single-chain runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutput {
    #[serde(rename = "type")]
    pub output_type: NodeOutputType,
    #[serde(default)]
    pub content_format: String,
    pub content_role: NodeContentRole,
}

/// One vertex of the flow graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<NodeOutput>,
}

impl Node {
    pub fn start(id: impl Into<String>, next: Option<&str>) -> Self {
        Self {
            id: id.into(),
            node_type: NodeType::Start,
            agent_name: None,
            next: next.map(String::from),
            output: None,
        }
    }

    pub fn agent(id: impl Into<String>, agent_name: impl Into<String>, next: Option<&str>) -> Self {
        Self {
            id: id.into(),
            node_type: NodeType::Agent,
            agent_name: Some(agent_name.into()),
            next: next.map(String::from),
            output: None,
        }
    }

    pub fn is_agent(&self) -> bool {
        self.node_type == NodeType::Agent
    }
}

/// Model provider selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    #[serde(rename = "openai")]
    OpenAI,
    Anthropic,
}

impl fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelProvider::OpenAI => write!(f, "openai"),
            ModelProvider::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Transport used to reach a tool server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpProtocol {
    Stdio,
    #[serde(rename = "streamablehttp")]
    StreamableHttp,
}

/// One remote tool server an agent may call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpConfig {
    pub name: String,
    pub protocol: McpProtocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub envs: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Bearer credential for HTTP servers
    #[serde(default, rename = "key", skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
}

impl McpConfig {
    #[cfg(test)]
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            protocol: McpProtocol::Stdio,
            command: Some(command.into()),
            args,
            envs: HashMap::new(),
            url: None,
            authentication: None,
        }
    }

    #[cfg(test)]
    pub fn http(name: impl Into<String>, url: impl Into<String>, key: Option<String>) -> Self {
        Self {
            name: name.into(),
            protocol: McpProtocol::StreamableHttp,
            command: None,
            args: Vec::new(),
            envs: HashMap::new(),
            url: Some(url.into()),
            authentication: key,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self.protocol {
            McpProtocol::Stdio if self.command.as_deref().map_or(true, str::is_empty) => {
                Err(ConfigError::StdioWithoutCommand(self.name.clone()))
            }
            McpProtocol::StreamableHttp if self.url.as_deref().map_or(true, str::is_empty) => {
                Err(ConfigError::HttpWithoutUrl(self.name.clone()))
            }
            _ => Ok(()),
        }
    }
}

/// Per-agent tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: String,
    pub provider: ModelProvider,
    pub model_id: String,
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub top_p: f32,
    #[serde(default)]
    pub top_k: u32,
    /// Qualified tool names offered to the model. Empty offers every tool.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub mcp_servers: Vec<McpConfig>,
}

impl AgentConfig {
    pub fn new(provider: ModelProvider, model_id: impl Into<String>) -> Self {
        Self {
            description: String::new(),
            system_prompt: String::new(),
            provider,
            model_id: model_id.into(),
            max_tokens: 0,
            temperature: 0.0,
            top_p: 0.0,
            top_k: 0,
            tools: Vec::new(),
            mcp_servers: Vec::new(),
        }
    }
}

/// Static configuration bundle of a flow
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentFlowConfig {
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl AgentFlowConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Json(e.to_string()))
    }

    /// Validate tool-server descriptors of every agent
    pub(crate) fn validate_agents(&self) -> Result<(), ConfigError> {
        for agent in self.agents.values() {
            for server in &agent.mcp_servers {
                server.validate()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stored_flow_format() {
        let json = r#"{
            "agents": {
                "analyst": {
                    "systemPrompt": "You analyse stocks",
                    "provider": "openai",
                    "modelId": "qwen/qwen3-coder:free",
                    "maxTokens": 1024,
                    "temperature": 0.2,
                    "topP": 0.9,
                    "topK": 40,
                    "tools": [],
                    "mcpServers": [
                        {"name": "stock", "protocol": "stdio", "command": "stockmind", "args": ["mcp"]},
                        {"name": "remote", "protocol": "streamablehttp", "url": "http://localhost:8090/mcp", "key": "Bearer abc"}
                    ]
                }
            },
            "nodes": [
                {"id": "start", "type": "start", "next": "analyst"},
                {"id": "analyst", "type": "agent", "agentName": "analyst",
                 "output": {"type": "text", "contentFormat": "", "contentRole": "user"}}
            ]
        }"#;

        let config = AgentFlowConfig::from_json(json).unwrap();
        let agent = &config.agents["analyst"];
        assert_eq!(agent.provider, ModelProvider::OpenAI);
        assert_eq!(agent.max_tokens, 1024);
        assert_eq!(agent.top_k, 40);
        assert_eq!(agent.mcp_servers[0].protocol, McpProtocol::Stdio);
        assert_eq!(agent.mcp_servers[1].authentication.as_deref(), Some("Bearer abc"));
        assert_eq!(config.nodes[1].agent_name.as_deref(), Some("analyst"));
        assert_eq!(
            config.nodes[1].output.as_ref().map(|o| o.output_type),
            Some(NodeOutputType::Text)
        );
        assert!(config.validate_agents().is_ok());
    }

    #[test]
    fn test_unknown_protocol_is_rejected() {
        let json = r#"{"agents": {"a": {"provider": "openai", "modelId": "m",
            "mcpServers": [{"name": "x", "protocol": "websocket"}]}}, "nodes": []}"#;
        assert!(matches!(AgentFlowConfig::from_json(json), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_mcp_descriptor_validation() {
        let mut stdio = McpConfig::stdio("s", "", vec![]);
        assert_eq!(stdio.validate(), Err(ConfigError::StdioWithoutCommand("s".into())));
        stdio.command = Some("server".into());
        assert!(stdio.validate().is_ok());

        let mut http = McpConfig::http("h", "", None);
        assert_eq!(http.validate(), Err(ConfigError::HttpWithoutUrl("h".into())));
        http.url = None;
        assert_eq!(http.validate(), Err(ConfigError::HttpWithoutUrl("h".into())));
    }
}
