//! Node contract
//!
//! A node is one processing step of a workflow graph. It inspects the
//! current state and returns the next [`GraphCommand`] through the result
//! channel.

use async_trait::async_trait;

use super::command::GraphCommand;
use super::id::NodeId;
use super::result::WorkflowResult;
use super::state::GraphWorkflowState;
use crate::error::WorkflowError;

/// What a node returns: a command, a failure, or a suspension.
pub type NodeOutcome<T> = WorkflowResult<GraphCommand<T>, WorkflowError>;

/// Node trait
///
/// # Example
///
/// ```rust,ignore
/// struct Review { id: NodeId }
///
/// #[async_trait]
/// impl WorkflowNode<Order> for Review {
///     fn id(&self) -> &NodeId {
///         &self.id
///     }
///
///     async fn process(&self, state: &GraphWorkflowState<Order>) -> NodeOutcome<Order> {
///         match state.data() {
///             Some(order) if order.total > 1000.0 => {
///                 GraphCommand::suspend("approve-1", "manual approval").into()
///             }
///             _ => WorkflowResult::success(GraphCommand::traverse(NodeId::new("ship")?)),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait WorkflowNode<T>: Send + Sync {
    /// Stable node id
    fn id(&self) -> &NodeId;

    /// Human-readable name, defaults to the id
    fn name(&self) -> &str {
        self.id().as_str()
    }

    fn description(&self) -> Option<&str> {
        None
    }

    fn is_entry_point(&self) -> bool {
        false
    }

    fn is_exit_point(&self) -> bool {
        false
    }

    /// Run the node against the current state.
    async fn process(&self, state: &GraphWorkflowState<T>) -> NodeOutcome<T>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::id::WorkflowId;

    struct Doubler {
        id: NodeId,
    }

    #[async_trait]
    impl WorkflowNode<u32> for Doubler {
        fn id(&self) -> &NodeId {
            &self.id
        }

        async fn process(&self, state: &GraphWorkflowState<u32>) -> NodeOutcome<u32> {
            match state.data() {
                Some(n) => WorkflowResult::success(GraphCommand::complete(n * 2)),
                None => WorkflowResult::failure(WorkflowError::execution(
                    self.id.clone(),
                    "no payload",
                )),
            }
        }
    }

    #[tokio::test]
    async fn test_node_defaults_and_process() {
        let node = Doubler {
            id: NodeId::new("double").unwrap(),
        };
        assert_eq!(node.name(), "double");
        assert!(node.description().is_none());
        assert!(!node.is_entry_point());

        let state = GraphWorkflowState::start(WorkflowId::random(), node.id().clone(), 21);
        match node.process(&state).await {
            WorkflowResult::Success(GraphCommand::Complete(c)) => assert_eq!(*c.result(), 42),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let empty = GraphWorkflowState::unpositioned(WorkflowId::random(), None);
        let err = node.process(&empty).await.error().cloned().unwrap();
        assert_eq!(err.node_id(), Some(node.id()));
    }
}
