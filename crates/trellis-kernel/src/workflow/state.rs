//! Graph Workflow State
//!
//! The unit of persisted, resumable state. A [`GraphWorkflowState`] bundles
//! the workflow id, the payload, the typed context, the graph position and
//! version metadata into one immutable snapshot. Every mutating operation
//! returns a new snapshot whose version is exactly one higher.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::context::{ContextError, ContextKey, ContextValue, WorkflowContext};
use super::id::{EdgeId, NodeId, WorkflowId};
use super::position::GraphPosition;

/// Bounds a workflow payload must satisfy to travel through the engine and
/// survive suspension.
pub trait Payload: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Payload for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Version and timestamp metadata of a state snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMetadata {
    version: u64,
    created_at: DateTime<Utc>,
    last_modified: DateTime<Utc>,
}

impl StateMetadata {
    fn initial() -> Self {
        let now = Utc::now();
        Self {
            version: 1,
            created_at: now,
            last_modified: now,
        }
    }

    fn bump(&self) -> Self {
        Self {
            version: self.version + 1,
            created_at: self.created_at,
            last_modified: Utc::now().max(self.last_modified),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }
}

/// Immutable, versioned workflow state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphWorkflowState<T> {
    workflow_id: WorkflowId,
    #[serde(default = "Option::default")]
    data: Option<T>,
    #[serde(default)]
    context: WorkflowContext,
    #[serde(default)]
    position: Option<GraphPosition>,
    metadata: StateMetadata,
}

impl<T> GraphWorkflowState<T> {
    /// Fresh state at `start`, version 1.
    pub fn start(workflow_id: WorkflowId, start: NodeId, data: T) -> Self {
        Self::start_with_context(workflow_id, start, Some(data), WorkflowContext::empty())
    }

    /// Fresh state at `start` with an optional payload and a seed context.
    pub fn start_with_context(
        workflow_id: WorkflowId,
        start: NodeId,
        data: Option<T>,
        context: WorkflowContext,
    ) -> Self {
        Self {
            workflow_id,
            data,
            context,
            position: Some(GraphPosition::at(start)),
            metadata: StateMetadata::initial(),
        }
    }

    /// Template state that has not been placed in a graph yet.
    pub fn unpositioned(workflow_id: WorkflowId, data: Option<T>) -> Self {
        Self {
            workflow_id,
            data,
            context: WorkflowContext::empty(),
            position: None,
            metadata: StateMetadata::initial(),
        }
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn context(&self) -> &WorkflowContext {
        &self.context
    }

    /// Current node; `None` only for an unpositioned template.
    pub fn current_node(&self) -> Option<&NodeId> {
        self.position.as_ref().map(GraphPosition::current)
    }

    pub fn position(&self) -> Option<&GraphPosition> {
        self.position.as_ref()
    }

    pub fn metadata(&self) -> &StateMetadata {
        &self.metadata
    }

    pub fn version(&self) -> u64 {
        self.metadata.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.metadata.created_at
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.metadata.last_modified
    }

    /// Typed context lookup.
    pub fn get<V: ContextValue>(&self, key: &ContextKey<V>) -> Option<V> {
        self.context.get(key)
    }
}

impl<T: Clone> GraphWorkflowState<T> {
    fn next(
        &self,
        data: Option<T>,
        context: WorkflowContext,
        position: Option<GraphPosition>,
    ) -> Self {
        Self {
            workflow_id: self.workflow_id.clone(),
            data,
            context,
            position,
            metadata: self.metadata.bump(),
        }
    }

    /// Replace the payload.
    pub fn with_data(&self, data: T) -> Self {
        self.next(Some(data), self.context.clone(), self.position.clone())
    }

    /// Replace the context.
    pub fn with_context(&self, context: WorkflowContext) -> Self {
        self.next(self.data.clone(), context, self.position.clone())
    }

    /// Merge `updates` into the context, incoming values winning.
    pub fn merge_context(&self, updates: &WorkflowContext) -> Self {
        self.with_context(self.context.merge(updates))
    }

    /// Bind one context slot.
    pub fn with_context_value<V: ContextValue>(
        &self,
        key: &ContextKey<V>,
        value: V,
    ) -> Result<Self, ContextError> {
        Ok(self.with_context(self.context.with(key, value)?))
    }

    /// Replace payload and context in one versioned step.
    pub fn with_data_and_context(&self, data: Option<T>, context: WorkflowContext) -> Self {
        self.next(data, context, self.position.clone())
    }

    /// Move to `node`. An unpositioned template is placed at `node`.
    pub fn move_to_node(&self, node: NodeId) -> Self {
        let position = match &self.position {
            Some(position) => position.move_to(node),
            None => GraphPosition::at(node),
        };
        self.next(self.data.clone(), self.context.clone(), Some(position))
    }

    /// Move to `target` through `edge`.
    pub fn traverse_edge(&self, edge: EdgeId, target: NodeId) -> Self {
        let position = match &self.position {
            Some(position) => position.traverse_edge(edge, target),
            None => GraphPosition::at(target),
        };
        self.next(self.data.clone(), self.context.clone(), Some(position))
    }

    /// Jump back to an (often already visited) node.
    pub fn reset_to_node(&self, node: NodeId) -> Self {
        let position = match &self.position {
            Some(position) => position.reset_to(node),
            None => GraphPosition::at(node),
        };
        self.next(self.data.clone(), self.context.clone(), Some(position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        total: f64,
    }

    fn node(id: &str) -> NodeId {
        NodeId::new(id).unwrap()
    }

    fn start() -> GraphWorkflowState<Order> {
        GraphWorkflowState::start(
            WorkflowId::new("order-1").unwrap(),
            node("intake"),
            Order { total: 10.0 },
        )
    }

    #[test]
    fn test_factory_seeds_version_one() {
        let state = start();
        assert_eq!(state.version(), 1);
        assert_eq!(state.current_node(), Some(&node("intake")));
        assert_eq!(state.created_at(), state.last_modified());
        assert!(state.context().is_empty());
    }

    #[test]
    fn test_every_mutation_bumps_version_once() {
        let s = start();
        let saved = s.clone();
        let key = ContextKey::<String>::new("status").unwrap();

        let results = vec![
            s.with_data(Order { total: 20.0 }),
            s.with_context(WorkflowContext::of(&key, "open".into()).unwrap()),
            s.merge_context(&WorkflowContext::empty()),
            s.with_context_value(&key, "open".into()).unwrap(),
            s.with_data_and_context(None, WorkflowContext::empty()),
            s.move_to_node(node("review")),
            s.traverse_edge(EdgeId::new("e1").unwrap(), node("review")),
            s.reset_to_node(node("intake")),
        ];

        for next in results {
            assert_eq!(next.version(), s.version() + 1);
            assert!(next.last_modified() >= s.last_modified());
            assert_eq!(next.created_at(), s.created_at());
        }
        assert_eq!(s, saved);
    }

    #[test]
    fn test_moves_update_position() {
        let state = start()
            .traverse_edge(EdgeId::new("e1").unwrap(), node("review"))
            .move_to_node(node("ship"))
            .reset_to_node(node("intake"));

        let position = state.position().unwrap();
        assert_eq!(position.path_string(), "intake -> review -> ship -> intake");
        assert!(position.has_traversed_edge(&EdgeId::new("e1").unwrap()));
        assert_eq!(state.version(), 4);
    }

    #[test]
    fn test_unpositioned_template_is_placed_on_first_move() {
        let template: GraphWorkflowState<Order> =
            GraphWorkflowState::unpositioned(WorkflowId::new("tmpl").unwrap(), None);
        assert!(template.current_node().is_none());

        let placed = template.move_to_node(node("intake"));
        assert_eq!(placed.current_node(), Some(&node("intake")));
        assert_eq!(placed.position().unwrap().depth(), 0);
        assert_eq!(placed.version(), 2);
    }

    #[test]
    fn test_serde_roundtrip() {
        let key = ContextKey::<f64>::new("amount").unwrap();
        let state = start()
            .with_context_value(&key, 1500.0)
            .unwrap()
            .move_to_node(node("review"));

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["workflow_id"], json!("order-1"));
        assert_eq!(json["metadata"]["version"], json!(3));

        let back: GraphWorkflowState<Order> = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.get(&key), Some(1500.0));
    }
}
