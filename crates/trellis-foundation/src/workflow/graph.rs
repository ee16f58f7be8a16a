//! Graph definition
//!
//! A [`GraphWorkflow`] is an id-keyed set of nodes plus conditioned edges,
//! read-only once built. States only ever hold ids, so the same definition
//! serves any number of concurrent or resumed instances.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};
use trellis_kernel::WorkflowError;
use trellis_kernel::workflow::{
    Condition, EdgeCondition, EdgeId, GraphWorkflowState, NodeId, WorkflowNode,
};

/// Directed, optionally conditioned edge between two nodes.
pub struct GraphEdge<T> {
    id: EdgeId,
    from: NodeId,
    to: NodeId,
    condition: Condition<T>,
    priority: i32,
    description: Option<String>,
}

impl<T: 'static> GraphEdge<T> {
    /// Unconditional edge with a random id.
    pub fn new(from: NodeId, to: NodeId) -> Self {
        Self {
            id: EdgeId::random(),
            from,
            to,
            condition: Condition::always(),
            priority: 0,
            description: None,
        }
    }

    pub fn with_id(mut self, id: EdgeId) -> Self {
        self.id = id;
        self
    }

    pub fn with_condition(mut self, condition: Condition<T>) -> Self {
        self.condition = condition;
        self
    }

    /// Higher priorities are preferred when several edges are eligible.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl<T> GraphEdge<T> {
    pub fn id(&self) -> &EdgeId {
        &self.id
    }

    pub fn from(&self) -> &NodeId {
        &self.from
    }

    pub fn to(&self) -> &NodeId {
        &self.to
    }

    pub fn condition(&self) -> &Condition<T> {
        &self.condition
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Whether the edge may be taken from `state`. Condition errors count as
    /// non-matching.
    pub fn is_eligible(&self, state: &GraphWorkflowState<T>) -> bool {
        self.condition.evaluate(state)
    }
}

impl<T> fmt::Debug for GraphEdge<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphEdge")
            .field("id", &self.id)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("condition", &self.condition)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Immutable workflow graph.
pub struct GraphWorkflow<T> {
    name: String,
    version: String,
    start: NodeId,
    nodes: HashMap<NodeId, Arc<dyn WorkflowNode<T>>>,
    edges: Vec<GraphEdge<T>>,
    /// Outgoing edge indexes per node, by descending priority then insertion.
    outgoing: HashMap<NodeId, Vec<usize>>,
}

impl<T: Send + Sync + 'static> GraphWorkflow<T> {
    pub fn builder(name: impl Into<String>) -> GraphWorkflowBuilder<T> {
        GraphWorkflowBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Workflow definition version recorded on every suspension.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn start_node(&self) -> &NodeId {
        &self.start
    }

    pub fn node(&self, id: &NodeId) -> Option<&Arc<dyn WorkflowNode<T>>> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> &[GraphEdge<T>] {
        &self.edges
    }

    /// Outgoing edges of `from`, most preferred first.
    pub fn outgoing_edges(&self, from: &NodeId) -> Vec<&GraphEdge<T>> {
        self.outgoing
            .get(from)
            .map(|indexes| indexes.iter().map(|&i| &self.edges[i]).collect())
            .unwrap_or_default()
    }

    /// First eligible outgoing edge of the state's current node.
    pub fn select_edge(&self, state: &GraphWorkflowState<T>) -> Option<&GraphEdge<T>> {
        let current = state.current_node()?;
        self.outgoing_edges(current)
            .into_iter()
            .find(|edge| edge.is_eligible(state))
    }

    /// First eligible edge `from -> to`.
    pub fn edge_between(
        &self,
        from: &NodeId,
        to: &NodeId,
        state: &GraphWorkflowState<T>,
    ) -> Option<&GraphEdge<T>> {
        self.outgoing_edges(from)
            .into_iter()
            .find(|edge| edge.to() == to && edge.is_eligible(state))
    }

    fn reachable_from(&self, start: &NodeId) -> HashSet<NodeId> {
        let mut reachable = HashSet::new();
        let mut stack = vec![start.clone()];

        while let Some(node) = stack.pop() {
            if reachable.insert(node.clone()) {
                for edge in self.outgoing_edges(&node) {
                    if !reachable.contains(edge.to()) {
                        stack.push(edge.to().clone());
                    }
                }
            }
        }

        reachable
    }
}

impl<T> fmt::Debug for GraphWorkflow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut nodes: Vec<&str> = self.nodes.keys().map(NodeId::as_str).collect();
        nodes.sort_unstable();
        f.debug_struct("GraphWorkflow")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("start", &self.start)
            .field("nodes", &nodes)
            .field("edges", &self.edges)
            .finish()
    }
}

/// Builder for [`GraphWorkflow`]; all structural checks run in `build`.
pub struct GraphWorkflowBuilder<T> {
    name: String,
    version: String,
    start: Option<NodeId>,
    nodes: Vec<Arc<dyn WorkflowNode<T>>>,
    edges: Vec<GraphEdge<T>>,
}

impl<T: Send + Sync + 'static> GraphWorkflowBuilder<T> {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_string(),
            start: None,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn add_node(self, node: impl WorkflowNode<T> + 'static) -> Self {
        self.add_shared_node(Arc::new(node))
    }

    pub fn add_shared_node(mut self, node: Arc<dyn WorkflowNode<T>>) -> Self {
        debug!("Adding node '{}' to workflow '{}'", node.id(), self.name);
        self.nodes.push(node);
        self
    }

    pub fn add_edge(mut self, edge: GraphEdge<T>) -> Self {
        debug!("Adding edge {}: {} -> {}", edge.id(), edge.from(), edge.to());
        self.edges.push(edge);
        self
    }

    /// Unconditional edge `from -> to`.
    pub fn connect(self, from: NodeId, to: NodeId) -> Self {
        self.add_edge(GraphEdge::new(from, to))
    }

    /// Conditional edge `from -> to`.
    pub fn connect_when(self, from: NodeId, to: NodeId, condition: Condition<T>) -> Self {
        self.add_edge(GraphEdge::new(from, to).with_condition(condition))
    }

    /// Set the start node. Without it, the single node flagged as entry point
    /// is used.
    pub fn start_at(mut self, node: NodeId) -> Self {
        self.start = Some(node);
        self
    }

    pub fn build(self) -> Result<GraphWorkflow<T>, WorkflowError> {
        let mut errors = Vec::new();

        if self.version.is_empty() {
            errors.push("Workflow version must not be empty".to_string());
        }

        let mut nodes: HashMap<NodeId, Arc<dyn WorkflowNode<T>>> = HashMap::new();
        for node in self.nodes {
            let id = node.id().clone();
            if nodes.insert(id.clone(), node).is_some() {
                errors.push(format!("Duplicate node '{id}'"));
            }
        }

        let start = match self.start {
            Some(start) => Some(start),
            None => {
                let entries: Vec<&NodeId> = nodes
                    .values()
                    .filter(|n| n.is_entry_point())
                    .map(|n| n.id())
                    .collect();
                match entries.as_slice() {
                    [single] => Some((*single).clone()),
                    [] => {
                        errors.push("No start node set. Use start_at() or flag an entry point.".to_string());
                        None
                    }
                    _ => {
                        errors.push("Several entry points found; use start_at() to pick one".to_string());
                        None
                    }
                }
            }
        };
        if let Some(start) = &start
            && !nodes.contains_key(start)
        {
            errors.push(format!("Start node '{start}' does not exist"));
        }

        let mut edge_ids = HashSet::new();
        for edge in &self.edges {
            if !edge_ids.insert(edge.id().clone()) {
                errors.push(format!("Duplicate edge '{}'", edge.id()));
            }
            if !nodes.contains_key(edge.from()) {
                errors.push(format!("Edge source '{}' does not exist", edge.from()));
            }
            if !nodes.contains_key(edge.to()) {
                errors.push(format!("Edge target '{}' does not exist", edge.to()));
            }
        }

        let (Some(start), true) = (start, errors.is_empty()) else {
            return Err(WorkflowError::validation(errors.join("; ")));
        };

        let mut outgoing: HashMap<NodeId, Vec<usize>> = HashMap::new();
        for (index, edge) in self.edges.iter().enumerate() {
            outgoing.entry(edge.from().clone()).or_default().push(index);
        }
        for indexes in outgoing.values_mut() {
            // stable: equal priorities keep insertion order
            indexes.sort_by_key(|&i| std::cmp::Reverse(self.edges[i].priority()));
        }

        let workflow = GraphWorkflow {
            name: self.name,
            version: self.version,
            start,
            nodes,
            edges: self.edges,
            outgoing,
        };

        // Nodes may still be reached through explicit Traverse commands.
        let reachable = workflow.reachable_from(&workflow.start);
        for id in workflow.nodes.keys() {
            if !reachable.contains(id) {
                warn!(workflow = %workflow.name, node_id = %id, "node has no edge path from the start node");
            }
        }

        info!(
            workflow = %workflow.name,
            version = %workflow.version,
            nodes = workflow.node_count(),
            edges = workflow.edge_count(),
            "workflow built"
        );
        Ok(workflow)
    }
}
