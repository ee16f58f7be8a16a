use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use trellis_kernel::workflow::{
    GraphCommand, GraphWorkflowState, NodeId, NodeOutcome, WorkflowNode, WorkflowResult,
};

/// A node that replays scripted outcomes.
///
/// Queued outcomes are returned in order; once the queue is drained every
/// call returns the fallback. Clones share the script and the call history,
/// so a test can keep one handle and register another in the graph.
#[derive(Clone)]
pub struct ScriptedNode<T> {
    id: NodeId,
    script: Arc<RwLock<VecDeque<NodeOutcome<T>>>>,
    fallback: NodeOutcome<T>,
    /// Every state this node was invoked with
    pub call_history: Arc<RwLock<Vec<GraphWorkflowState<T>>>>,
}

impl<T: Clone + Send + Sync + 'static> ScriptedNode<T> {
    pub fn new(id: NodeId, fallback: NodeOutcome<T>) -> Self {
        Self {
            id,
            script: Arc::new(RwLock::new(VecDeque::new())),
            fallback,
            call_history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Always traverses to `target`.
    pub fn traversing(id: NodeId, target: NodeId) -> Self {
        Self::new(id, WorkflowResult::success(GraphCommand::traverse(target)))
    }

    /// Always completes with `result`.
    pub fn completing(id: NodeId, result: T) -> Self {
        Self::new(id, WorkflowResult::success(GraphCommand::complete(result)))
    }

    /// Queue an outcome ahead of the fallback.
    pub async fn then(&self, outcome: NodeOutcome<T>) -> &Self {
        self.script.write().await.push_back(outcome);
        self
    }

    pub fn node_id(&self) -> &NodeId {
        &self.id
    }

    pub async fn history(&self) -> Vec<GraphWorkflowState<T>> {
        self.call_history.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.call_history.read().await.len()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> WorkflowNode<T> for ScriptedNode<T> {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn process(&self, state: &GraphWorkflowState<T>) -> NodeOutcome<T> {
        self.call_history.write().await.push(state.clone());
        match self.script.write().await.pop_front() {
            Some(outcome) => outcome,
            None => self.fallback.clone(),
        }
    }
}
