//! Validated node graph

use super::{AgentConfig, AgentFlowConfig, ConfigError, Node, NodeType};
use std::collections::HashMap;

/// Immutable, validated view of an [`AgentFlowConfig`].
///
/// The configured topology is a single chain, but lookups go through a
/// node-to-successor mapping so a branching flow only changes `successor`.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    config: AgentFlowConfig,
    index: HashMap<String, usize>,
    start: usize,
    entry: usize,
}

impl FlowGraph {
    pub fn new(config: AgentFlowConfig) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(config.nodes.len());
        let mut start: Option<usize> = None;

        for (i, node) in config.nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(ConfigError::DuplicateNode(node.id.clone()));
            }
            match node.node_type {
                NodeType::Start => {
                    if let Some(prev) = start {
                        return Err(ConfigError::MultipleStart(
                            config.nodes[prev].id.clone(),
                            node.id.clone(),
                        ));
                    }
                    if node.agent_name.is_some() {
                        return Err(ConfigError::StartWithAgent(node.id.clone()));
                    }
                    start = Some(i);
                }
                NodeType::Agent => {
                    let agent = node
                        .agent_name
                        .as_ref()
                        .ok_or_else(|| ConfigError::AgentNodeWithoutAgent(node.id.clone()))?;
                    if !config.agents.contains_key(agent) {
                        return Err(ConfigError::UnknownAgent {
                            node: node.id.clone(),
                            agent: agent.clone(),
                        });
                    }
                }
            }
        }

        for node in &config.nodes {
            if let Some(next) = &node.next {
                if !index.contains_key(next) {
                    return Err(ConfigError::DanglingSuccessor {
                        node: node.id.clone(),
                        next: next.clone(),
                    });
                }
            }
        }

        let start = start.ok_or(ConfigError::MissingStart)?;
        let start_node = &config.nodes[start];
        let entry = start_node
            .next
            .as_ref()
            .and_then(|next| index.get(next).copied())
            .filter(|&i| config.nodes[i].is_agent())
            .ok_or_else(|| ConfigError::StartWithoutAgentSuccessor(start_node.id.clone()))?;

        config.validate_agents()?;

        Ok(Self {
            config,
            index,
            start,
            entry,
        })
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.config.nodes[i])
    }

    pub fn start(&self) -> &Node {
        &self.config.nodes[self.start]
    }

    pub fn successor(&self, id: &str) -> Option<&Node> {
        self.node(id)?.next.as_deref().and_then(|next| self.node(next))
    }

    /// The agent node a human message is handed to
    pub fn entry_agent_node(&self) -> &Node {
        &self.config.nodes[self.entry]
    }

    pub fn agents(&self) -> impl Iterator<Item = (&String, &AgentConfig)> {
        self.config.agents.iter()
    }

    pub fn config(&self) -> &AgentFlowConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{McpConfig, ModelProvider};

    fn agents(names: &[&str]) -> HashMap<String, AgentConfig> {
        names
            .iter()
            .map(|n| ((*n).to_string(), AgentConfig::new(ModelProvider::OpenAI, "test-model")))
            .collect()
    }

    fn config(nodes: Vec<Node>) -> AgentFlowConfig {
        AgentFlowConfig {
            agents: agents(&["analyst", "writer"]),
            nodes,
        }
    }

    #[test]
    fn test_single_chain() {
        let graph = FlowGraph::new(config(vec![
            Node::start("start", Some("analyst")),
            Node::agent("analyst", "analyst", None),
        ]))
        .unwrap();

        assert_eq!(graph.start().id, "start");
        assert_eq!(graph.entry_agent_node().id, "analyst");
        assert!(graph.successor("analyst").is_none());
        assert!(graph.node("missing").is_none());
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let err = FlowGraph::new(config(vec![
            Node::start("start", Some("analyst")),
            Node::agent("analyst", "analyst", None),
            Node::agent("analyst", "writer", None),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::DuplicateNode("analyst".into()));
    }

    #[test]
    fn test_rejects_missing_and_multiple_start() {
        let err = FlowGraph::new(config(vec![Node::agent("analyst", "analyst", None)])).unwrap_err();
        assert_eq!(err, ConfigError::MissingStart);

        let err = FlowGraph::new(config(vec![
            Node::start("a", Some("analyst")),
            Node::start("b", Some("analyst")),
            Node::agent("analyst", "analyst", None),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::MultipleStart("a".into(), "b".into()));
    }

    #[test]
    fn test_rejects_bad_agent_binding() {
        let mut start = Node::start("start", Some("analyst"));
        start.agent_name = Some("analyst".into());
        let err = FlowGraph::new(config(vec![start, Node::agent("analyst", "analyst", None)]))
            .unwrap_err();
        assert_eq!(err, ConfigError::StartWithAgent("start".into()));

        let mut unbound = Node::agent("analyst", "analyst", None);
        unbound.agent_name = None;
        let err = FlowGraph::new(config(vec![Node::start("start", Some("analyst")), unbound]))
            .unwrap_err();
        assert_eq!(err, ConfigError::AgentNodeWithoutAgent("analyst".into()));

        let err = FlowGraph::new(config(vec![
            Node::start("start", Some("x")),
            Node::agent("x", "ghost", None),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownAgent {
                node: "x".into(),
                agent: "ghost".into()
            }
        );
    }

    #[test]
    fn test_rejects_dangling_and_non_agent_entry() {
        let err = FlowGraph::new(config(vec![
            Node::start("start", Some("analyst")),
            Node::agent("analyst", "analyst", Some("nowhere")),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::DanglingSuccessor { .. }));

        let err = FlowGraph::new(config(vec![
            Node::start("start", None),
            Node::agent("analyst", "analyst", None),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::StartWithoutAgentSuccessor("start".into()));
    }

    #[test]
    fn test_validates_tool_servers() {
        let mut cfg = config(vec![
            Node::start("start", Some("analyst")),
            Node::agent("analyst", "analyst", None),
        ]);
        cfg.agents
            .get_mut("analyst")
            .unwrap()
            .mcp_servers
            .push(McpConfig::http("remote", "", None));
        assert_eq!(
            FlowGraph::new(cfg).unwrap_err(),
            ConfigError::HttpWithoutUrl("remote".into())
        );
    }
}
