//! Session manager: executes turn steps against persisted history

use super::traits::HistoryStore;
use super::SessionError;
use crate::agent::{Agent, AgentError};
use crate::db::{HistoryEntry, Session};
use crate::flow::FlowGraph;
use crate::llm::{BackendRegistry, HistoryMessage, StopReason, StreamSink};
use crate::mcp::CallerContext;
use crate::state_machine::{is_human_turn, next_step, Step};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Stateful controller for one session.
///
/// Driven by a single caller; each step completes before the next starts.
pub struct SessionManager<S: HistoryStore> {
    session: Session,
    graph: Arc<FlowGraph>,
    agents: HashMap<String, Agent>,
    history: Vec<HistoryEntry>,
    store: S,
    cancel: CancellationToken,
}

impl<S: HistoryStore> SessionManager<S> {
    pub fn new(
        session: Session,
        graph: Arc<FlowGraph>,
        agents: HashMap<String, Agent>,
        history: Vec<HistoryEntry>,
        store: S,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            graph,
            agents,
            history,
            store,
            cancel,
        }
    }

    /// Load history and build every configured agent.
    pub async fn initialize(
        session: Session,
        graph: Arc<FlowGraph>,
        backends: &BackendRegistry,
        store: S,
        cancel: CancellationToken,
    ) -> Result<Self, SessionError> {
        let history = store
            .read_history(&session.id)
            .await
            .map_err(SessionError::Store)?;

        let mut agents = HashMap::new();
        for (name, config) in graph.agents() {
            let agent = Agent::connect(name, config.clone(), backends, &cancel).await?;
            agents.insert(name.clone(), agent);
        }

        tracing::info!(
            session_id = %session.id,
            history_len = history.len(),
            agent_count = agents.len(),
            "Session initialized"
        );
        Ok(Self::new(session, graph, agents, history, store, cancel))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    #[cfg(test)]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn last(&self) -> Option<(&str, StopReason)> {
        self.history
            .last()
            .map(|e| (e.node_id.as_str(), e.stop_reason))
    }

    fn agent(&self, name: &str) -> Result<&Agent, SessionError> {
        self.agents
            .get(name)
            .ok_or_else(|| SessionError::UnknownAgent(name.to_string()))
    }

    fn caller(&self) -> CallerContext {
        CallerContext {
            user_id: self.session.user_id.clone(),
            session_id: self.session.id.clone(),
        }
    }

    pub fn is_human_turn(&self) -> bool {
        is_human_turn(&self.graph, self.last())
    }

    /// Record a human message on the `start` node.
    pub async fn human_input(&mut self, text: &str) -> Result<&HistoryEntry, SessionError> {
        if !self.is_human_turn() {
            return Err(SessionError::NotHumanTurn);
        }

        // The message format belongs to the agent that will read it first
        let entry_node = self.graph.entry_agent_node();
        let agent_name = entry_node
            .agent_name
            .as_deref()
            .ok_or_else(|| SessionError::UnknownAgent(entry_node.id.clone()))?;
        let message = self.agent(agent_name)?.backend().user_message(text);

        let start_id = self.graph.start().id.clone();
        let entry = self
            .store
            .append_history(&self.session.id, &message, StopReason::UserInput, &start_id)
            .await
            .map_err(SessionError::Store)?;

        tracing::info!(session_id = %self.session.id, node = %start_id, "Human input recorded");
        Ok(self.push(entry))
    }

    fn push(&mut self, entry: HistoryEntry) -> &HistoryEntry {
        self.history.push(entry);
        &self.history[self.history.len() - 1]
    }

    /// Execute exactly one step and append its entry.
    pub async fn continue_turn(&mut self, sink: &StreamSink) -> Result<&HistoryEntry, SessionError> {
        let step = next_step(&self.graph, self.last())?;
        let agent = self.agent(step.agent())?;
        let start = std::time::Instant::now();

        let outcome = match &step {
            Step::Complete { .. } => {
                let messages: Vec<HistoryMessage> =
                    self.history.iter().map(|e| e.content.clone()).collect();
                agent
                    .run_completion(&messages, sink, &self.cancel)
                    .await
                    .map(|c| (c.message, c.stop_reason))
            }
            Step::ExecuteTools { .. } => {
                let Some(last) = self.history.last() else {
                    return Err(AgentError::NoToolCallsFound.into());
                };
                agent
                    .execute_tools(&last.content, &self.caller(), &self.cancel)
                    .await
                    .map(|message| (message, StopReason::ToolResult))
            }
        };

        let (message, stop_reason) = match outcome {
            Ok(outcome) => outcome,
            Err(_) if self.cancel.is_cancelled() => {
                tracing::info!(session_id = %self.session.id, node = %step.node_id(), "Step cancelled");
                return Err(SessionError::Cancelled);
            }
            Err(e) => {
                tracing::error!(
                    session_id = %self.session.id,
                    node = %step.node_id(),
                    agent = %step.agent(),
                    error = %e,
                    "Step failed"
                );
                return Err(e.into());
            }
        };

        let entry = self
            .store
            .append_history(&self.session.id, &message, stop_reason, step.node_id())
            .await
            .map_err(SessionError::Store)?;
        // The stored entry decides the next step, whatever happens to the count
        self.history.push(entry);

        let turn_count = self.session.turn_count + 1;
        self.store
            .update_turn_count(&self.session.id, turn_count)
            .await
            .map_err(SessionError::Store)?;
        self.session.turn_count = turn_count;

        tracing::info!(
            session_id = %self.session.id,
            node = %step.node_id(),
            agent = %step.agent(),
            stop_reason = %stop_reason,
            duration_ms = %start.elapsed().as_millis(),
            "Step complete"
        );
        Ok(&self.history[self.history.len() - 1])
    }

    /// Continue until control returns to the human, failing after `limit` steps.
    pub async fn run_until_human_turn(
        &mut self,
        limit: usize,
        sink: &StreamSink,
    ) -> Result<usize, SessionError> {
        let mut steps = 0;
        while !self.is_human_turn() {
            if steps >= limit {
                tracing::warn!(session_id = %self.session.id, limit, "Too many loops");
                return Err(SessionError::TooManyLoops { limit });
            }
            self.continue_turn(sink).await?;
            steps += 1;
        }
        Ok(steps)
    }

    /// One full turn: record `text`, then drive the flow back to the human.
    pub async fn chat(
        &mut self,
        text: &str,
        limit: usize,
        sink: &StreamSink,
    ) -> Result<usize, SessionError> {
        self.human_input(text).await?;
        self.run_until_human_turn(limit, sink).await
    }
}
