//! Property-based tests for the turn state machine
//!
//! A simulated driver feeds arbitrary model outcomes through `next_step`
//! and checks the history invariants after every appended entry.

use super::*;
use crate::flow::{AgentConfig, AgentFlowConfig, FlowGraph, ModelProvider, Node};
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

fn chain(agent_names: &[&str]) -> FlowGraph {
    let agents = agent_names
        .iter()
        .map(|n| ((*n).to_string(), AgentConfig::new(ModelProvider::OpenAI, "m")))
        .collect();
    let mut nodes = vec![Node::start("start", agent_names.first().copied())];
    for (i, name) in agent_names.iter().enumerate() {
        nodes.push(Node::agent(*name, *name, agent_names.get(i + 1).copied()));
    }
    FlowGraph::new(AgentFlowConfig { agents, nodes }).unwrap()
}

type Entry = (String, StopReason);

fn last(history: &[Entry]) -> Option<(&str, StopReason)> {
    history.last().map(|(node, reason)| (node.as_str(), *reason))
}

/// Human-turn predicate restated independently of `is_human_turn`
fn expected_human_turn(entry: &Entry, graph: &FlowGraph) -> bool {
    graph.node(&entry.0).is_some_and(Node::is_agent)
        && matches!(
            entry.1,
            StopReason::AgentDone | StopReason::MaxTokens | StopReason::Unknown
        )
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_completion_outcome() -> impl Strategy<Value = StopReason> {
    prop_oneof![
        3 => Just(StopReason::ToolCall),
        2 => Just(StopReason::AgentDone),
        1 => Just(StopReason::MaxTokens),
        1 => Just(StopReason::Unknown),
    ]
}

fn arb_graph() -> impl Strategy<Value = FlowGraph> {
    prop_oneof![
        Just(chain(&["analyst"])),
        Just(chain(&["analyst", "writer"])),
    ]
}

fn arb_stop_reason() -> impl Strategy<Value = StopReason> {
    prop_oneof![
        Just(StopReason::UserInput),
        Just(StopReason::ToolCall),
        Just(StopReason::ToolResult),
        Just(StopReason::AgentDone),
        Just(StopReason::MaxTokens),
        Just(StopReason::Unknown),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Each step appends exactly one entry, on the node the table selects
    #[test]
    fn prop_driver_appends_one_entry_per_step(
        graph in arb_graph(),
        outcomes in proptest::collection::vec(arb_completion_outcome(), 1..40)
    ) {
        let mut history: Vec<Entry> = Vec::new();
        let mut outcomes = outcomes.into_iter();

        loop {
            if is_human_turn(&graph, last(&history)) {
                history.push(("start".to_string(), StopReason::UserInput));
                continue;
            }

            let before = history.len();
            let step = next_step(&graph, last(&history));
            prop_assert!(step.is_ok(), "no step while not the human's turn: {:?}", step);
            let step = step.unwrap();

            let appended = match &step {
                Step::Complete { node_id, .. } => match outcomes.next() {
                    Some(outcome) => (node_id.clone(), outcome),
                    None => break,
                },
                Step::ExecuteTools { node_id, .. } => (node_id.clone(), StopReason::ToolResult),
            };

            // The entry lands on the node the previous stop reason selects
            match last(&history) {
                Some((prev, StopReason::ToolCall | StopReason::ToolResult)) => {
                    prop_assert_eq!(step.node_id(), prev);
                }
                _ => prop_assert_eq!(step.node_id(), graph.entry_agent_node().id.as_str()),
            }
            if matches!(last(&history), Some((_, StopReason::ToolCall))) {
                let executes_tools = matches!(step, Step::ExecuteTools { .. });
                prop_assert!(executes_tools, "tool call not followed by tool execution: {:?}", step);
            }

            history.push(appended);
            prop_assert_eq!(history.len(), before + 1);

            let entry = &history[history.len() - 1];
            prop_assert_eq!(
                is_human_turn(&graph, last(&history)),
                expected_human_turn(entry, &graph)
            );
        }
    }

    // Whenever it is the human's turn with a non-empty history, no step is available
    #[test]
    fn prop_human_turn_blocks_continuation(
        graph in arb_graph(),
        reason in arb_stop_reason(),
        on_start in any::<bool>()
    ) {
        let node = if on_start { "start" } else { "analyst" };
        let last = Some((node, reason));
        if is_human_turn(&graph, last) {
            prop_assert!(next_step(&graph, last).is_err());
        }
    }

    // User input never counts as the human's turn, wherever it is recorded
    #[test]
    fn prop_user_input_is_never_human_turn(graph in arb_graph(), on_start in any::<bool>()) {
        let node = if on_start { "start" } else { "analyst" };
        prop_assert!(!is_human_turn(&graph, Some((node, StopReason::UserInput))));
    }
}
