//! Pure transition function

use super::{Step, TransitionError};
use crate::flow::{FlowGraph, Node};
use crate::llm::StopReason;

/// Select the step that follows the last history entry.
///
/// `last` is the node id and stop reason of the last entry, `None` for an
/// empty history.
pub fn next_step(graph: &FlowGraph, last: Option<(&str, StopReason)>) -> Result<Step, TransitionError> {
    let Some((node_id, stop_reason)) = last else {
        return complete_at(graph.entry_agent_node());
    };
    let node = graph
        .node(node_id)
        .ok_or_else(|| TransitionError::UnknownNode(node_id.to_string()))?;

    match stop_reason {
        StopReason::UserInput => complete_at(graph.entry_agent_node()),
        StopReason::ToolCall => {
            let agent = bound_agent(node)?;
            Ok(Step::ExecuteTools {
                node_id: node.id.clone(),
                agent,
            })
        }
        StopReason::ToolResult => complete_at(node),
        // A finished turn has no step to run. This is already the human's turn, so
        // drivers that check `is_human_turn` first never get here; a stray call is an
        // error rather than a silent no-op.
        StopReason::AgentDone => match graph.successor(node_id) {
            Some(next) if next.is_agent() => Err(TransitionError::HandoffUnsupported {
                from: node.id.clone(),
                to: next.id.clone(),
            }),
            _ => Err(TransitionError::TurnAlreadyComplete(node.id.clone())),
        },
        StopReason::MaxTokens | StopReason::Unknown => {
            Err(TransitionError::InvalidContinuation(stop_reason))
        }
    }
}

/// True when control belongs to the human: empty history, or an agent node
/// ended without a pending tool exchange.
pub fn is_human_turn(graph: &FlowGraph, last: Option<(&str, StopReason)>) -> bool {
    match last {
        None => true,
        Some((node_id, stop_reason)) => {
            graph.node(node_id).is_some_and(Node::is_agent)
                && !stop_reason.is_tool_exchange()
                && stop_reason != StopReason::UserInput
        }
    }
}

fn complete_at(node: &Node) -> Result<Step, TransitionError> {
    let agent = bound_agent(node)?;
    Ok(Step::Complete {
        node_id: node.id.clone(),
        agent,
    })
}

fn bound_agent(node: &Node) -> Result<String, TransitionError> {
    node.agent_name
        .clone()
        .filter(|_| node.is_agent())
        .ok_or_else(|| TransitionError::NotAgentNode(node.id.clone()))
}
