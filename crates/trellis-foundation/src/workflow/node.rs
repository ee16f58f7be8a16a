//! Closure-backed nodes

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use trellis_kernel::workflow::{GraphWorkflowState, NodeId, NodeOutcome, WorkflowNode};

type NodeFn<T> = dyn Fn(GraphWorkflowState<T>) -> BoxFuture<'static, NodeOutcome<T>> + Send + Sync;

/// A [`WorkflowNode`] built from a closure.
///
/// ```rust,ignore
/// let ship = FnNode::new(NodeId::new("ship")?, |state| async move {
///     let order = state.data().cloned();
///     WorkflowResult::success(GraphCommand::complete(order.unwrap_or_default()))
/// })
/// .with_name("Ship order")
/// .exit_point();
/// ```
pub struct FnNode<T> {
    id: NodeId,
    name: Option<String>,
    description: Option<String>,
    entry_point: bool,
    exit_point: bool,
    func: Arc<NodeFn<T>>,
}

impl<T: Send + Sync + 'static> FnNode<T> {
    /// Node backed by an async closure that owns its state snapshot.
    pub fn new<F, Fut>(id: NodeId, func: F) -> Self
    where
        F: Fn(GraphWorkflowState<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NodeOutcome<T>> + Send + 'static,
    {
        Self {
            id,
            name: None,
            description: None,
            entry_point: false,
            exit_point: false,
            func: Arc::new(
                move |state: GraphWorkflowState<T>| -> BoxFuture<'static, NodeOutcome<T>> {
                    Box::pin(func(state))
                },
            ),
        }
    }

    /// Node backed by a synchronous closure.
    pub fn from_fn<F>(id: NodeId, func: F) -> Self
    where
        F: Fn(&GraphWorkflowState<T>) -> NodeOutcome<T> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        Self::new(id, move |state| {
            let func = Arc::clone(&func);
            async move { func(&state) }
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn entry_point(mut self) -> Self {
        self.entry_point = true;
        self
    }

    pub fn exit_point(mut self) -> Self {
        self.exit_point = true;
        self
    }
}

impl<T> fmt::Debug for FnNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("entry_point", &self.entry_point)
            .field("exit_point", &self.exit_point)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T> WorkflowNode<T> for FnNode<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn is_entry_point(&self) -> bool {
        self.entry_point
    }

    fn is_exit_point(&self) -> bool {
        self.exit_point
    }

    async fn process(&self, state: &GraphWorkflowState<T>) -> NodeOutcome<T> {
        (self.func)(state.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_kernel::workflow::{GraphCommand, WorkflowId, WorkflowResult};

    #[tokio::test]
    async fn test_async_and_sync_constructors() {
        let id = NodeId::new("double").unwrap();
        let async_node = FnNode::new(id.clone(), |state: GraphWorkflowState<u32>| async move {
            let n = state.data().copied().unwrap_or_default();
            WorkflowResult::success(GraphCommand::complete(n * 2))
        })
        .with_name("Double")
        .entry_point();

        let sync_node = FnNode::from_fn(id.clone(), |state: &GraphWorkflowState<u32>| {
            WorkflowResult::success(GraphCommand::complete(state.data().copied().unwrap_or(0) + 1))
        });

        let state = GraphWorkflowState::start(WorkflowId::random(), id, 20);

        for (node, expected) in [(async_node, 40), (sync_node, 21)] {
            match node.process(&state).await {
                WorkflowResult::Success(GraphCommand::Complete(c)) => assert_eq!(*c.result(), expected),
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
    }

    #[test]
    fn test_metadata_defaults() {
        let node = FnNode::from_fn(NodeId::new("n").unwrap(), |_: &GraphWorkflowState<()>| {
            WorkflowResult::success(GraphCommand::complete(()))
        });
        assert_eq!(node.name(), "n");
        assert!(!node.is_entry_point());
        assert!(!node.is_exit_point());

        let node = node.with_name("Named").with_description("does things").exit_point();
        assert_eq!(node.name(), "Named");
        assert_eq!(node.description(), Some("does things"));
        assert!(node.is_exit_point());
    }
}
