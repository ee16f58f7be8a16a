//! Dispatch engine
//!
//! Runs one workflow instance node by node: take the current node from the
//! state, invoke it, dispatch on the returned command, repeat. The main line
//! is strictly sequential; only fork branches run concurrently, each on its
//! own copy of the state.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, debug_span, error, info, info_span, warn};
use trellis_kernel::workflow::{
    GraphCommand, GraphWorkflowState, Join, NodeId, NodeOutcome, Payload, StateSerializer,
    StateSuspension, Suspend, SuspensionRecord, SuspensionStore, Traverse, WorkflowContext,
    WorkflowExecution, WorkflowId, WorkflowNode, WorkflowResult, WorkflowSuspension,
};
use trellis_kernel::{WorkflowError, WorkflowOutcome};

use super::budget::StepBudget;
use super::graph::GraphWorkflow;
use super::serializer::JsonStateSerializer;
use crate::config::EngineConfig;

/// Where a dispatch loop runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lane {
    Main,
    Branch,
}

/// How a dispatch loop ended.
pub(crate) enum Flow<T> {
    Completed {
        result: T,
        state: GraphWorkflowState<T>,
    },
    Suspended(StateSuspension<T>),
    /// A fork branch reached its join node.
    Joined {
        join: Join,
        state: GraphWorkflowState<T>,
    },
    Failed {
        error: WorkflowError,
        state: Option<GraphWorkflowState<T>>,
    },
}

impl<T> Flow<T> {
    fn failed(error: WorkflowError, state: GraphWorkflowState<T>) -> Self {
        Self::Failed {
            error,
            state: Some(state),
        }
    }
}

/// Workflow dispatch engine.
///
/// Cheap to clone; clones share the graph, configuration, serializer and
/// store.
pub struct WorkflowEngine<T> {
    pub(crate) workflow: Arc<GraphWorkflow<T>>,
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) serializer: Arc<dyn StateSerializer<T>>,
    pub(crate) store: Option<Arc<dyn SuspensionStore>>,
    permits: Arc<Semaphore>,
}

impl<T> Clone for WorkflowEngine<T> {
    fn clone(&self) -> Self {
        Self {
            workflow: Arc::clone(&self.workflow),
            config: Arc::clone(&self.config),
            serializer: Arc::clone(&self.serializer),
            store: self.store.clone(),
            permits: Arc::clone(&self.permits),
        }
    }
}

impl<T> fmt::Debug for WorkflowEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("workflow", &self.workflow)
            .field("config", &self.config)
            .field("has_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Payload> WorkflowEngine<T> {
    /// Engine with default configuration and the JSON serializer.
    pub fn new(workflow: GraphWorkflow<T>) -> Self {
        let config = EngineConfig::default();
        Self {
            workflow: Arc::new(workflow),
            permits: Arc::new(Semaphore::new(config.max_parallelism)),
            config: Arc::new(config),
            serializer: Arc::new(JsonStateSerializer::new()),
            store: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.permits = Arc::new(Semaphore::new(config.max_parallelism.max(1)));
        self.config = Arc::new(config);
        self
    }

    pub fn with_serializer(mut self, serializer: impl StateSerializer<T> + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    /// Persist every suspension to `store`.
    pub fn with_store(mut self, store: Arc<dyn SuspensionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn workflow(&self) -> &GraphWorkflow<T> {
        &self.workflow
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a new instance at the workflow's start node.
    pub async fn start(&self, workflow_id: WorkflowId, data: T) -> WorkflowOutcome<T> {
        self.start_with_context(workflow_id, Some(data), WorkflowContext::empty())
            .await
    }

    /// Start a new instance with an optional payload and a seed context.
    pub async fn start_with_context(
        &self,
        workflow_id: WorkflowId,
        data: Option<T>,
        context: WorkflowContext,
    ) -> WorkflowOutcome<T> {
        let state = GraphWorkflowState::start_with_context(
            workflow_id,
            self.workflow.start_node().clone(),
            data,
            context,
        );
        self.run(state).await
    }

    /// Drive `state` until it completes, fails or suspends.
    pub async fn run(&self, state: GraphWorkflowState<T>) -> WorkflowOutcome<T> {
        self.run_detailed(state).await.into_result()
    }

    /// Like [`run`](Self::run), keeping the last state snapshot.
    ///
    /// An unpositioned state is placed at the start node first.
    pub async fn run_detailed(&self, state: GraphWorkflowState<T>) -> WorkflowExecution<T> {
        let span = info_span!(
            "workflow.run",
            workflow = %self.workflow.name(),
            workflow_id = %state.workflow_id(),
        );

        async move {
            let state = match state.current_node() {
                Some(_) => state,
                None => state.move_to_node(self.workflow.start_node().clone()),
            };
            info!(
                version = state.version(),
                node_id = ?state.current_node(),
                "workflow run started"
            );

            let budget = StepBudget::new(self.config.max_steps);
            let execution = match self.drive(state, &budget, Lane::Main).await {
                Flow::Completed { result, state } => WorkflowExecution::Completed { result, state },
                Flow::Suspended(suspension) => WorkflowExecution::Suspended(suspension),
                Flow::Failed { error, state } => WorkflowExecution::Failed { error, state },
                Flow::Joined { join, state } => WorkflowExecution::Failed {
                    error: WorkflowError::engine(format!(
                        "main line ended at join node '{}'",
                        join.join_node()
                    )),
                    state: Some(state),
                },
            };

            match execution.error() {
                Some(error) => warn!(
                    status = %execution.status(),
                    steps = budget.used(),
                    kind = %error.kind(),
                    error = %error,
                    "workflow run finished"
                ),
                None => info!(
                    status = %execution.status(),
                    steps = budget.used(),
                    "workflow run finished"
                ),
            }
            execution
        }
        .instrument(span)
        .await
    }

    /// The dispatch loop. Boxed because forks recurse into it.
    pub(crate) fn drive<'a>(
        &'a self,
        mut state: GraphWorkflowState<T>,
        budget: &'a StepBudget,
        lane: Lane,
    ) -> BoxFuture<'a, Flow<T>> {
        Box::pin(async move {
            loop {
                if let Err(error) = budget.consume() {
                    return Flow::failed(error, state);
                }
                let Some(node_id) = state.current_node().cloned() else {
                    return Flow::failed(
                        WorkflowError::validation("state is not positioned at any node"),
                        state,
                    );
                };
                let Some(node) = self.workflow.node(&node_id).cloned() else {
                    return Flow::failed(
                        WorkflowError::validation(format!(
                            "node '{node_id}' does not exist in workflow '{}'",
                            self.workflow.name()
                        )),
                        state,
                    );
                };

                debug!(node_id = %node_id, version = state.version(), "executing node");
                let command = match self.invoke(&node, &state, lane).await {
                    WorkflowResult::Success(command) => command,
                    WorkflowResult::Failure(error) => return Flow::failed(error, state),
                    WorkflowResult::Suspended(handle) => {
                        match Suspend::new(handle.suspension_id(), handle.reason()) {
                            Ok(suspend) => return self.suspend(state, suspend, &node_id, lane).await,
                            Err(error) => return Flow::failed(error, state),
                        }
                    }
                };
                debug!(node_id = %node_id, command = %command.kind(), "node returned");

                match command {
                    GraphCommand::Traverse(traverse) => {
                        match self.apply_traverse(&state, &node_id, traverse) {
                            Ok(next) => state = next,
                            Err(error) => return Flow::failed(error, state),
                        }
                    }
                    GraphCommand::Complete(complete) => {
                        let (result, updates) = complete.into_parts();
                        let state = apply_updates(state, updates);
                        if lane == Lane::Branch {
                            return Flow::failed(
                                WorkflowError::execution(
                                    node_id,
                                    "Complete is not allowed inside a fork branch",
                                ),
                                state,
                            );
                        }
                        return Flow::Completed { result, state };
                    }
                    GraphCommand::Suspend(suspend) => {
                        return self.suspend(state, suspend, &node_id, lane).await;
                    }
                    GraphCommand::Fork(fork) => match self.run_fork(&state, fork, budget).await {
                        Ok(joined) => state = joined,
                        Err(error) => return Flow::failed(error, state),
                    },
                    GraphCommand::Join(join) => {
                        if lane == Lane::Branch {
                            return Flow::Joined { join, state };
                        }
                        let target = join.join_node().clone();
                        if !self.workflow.contains_node(&target) {
                            return Flow::failed(
                                WorkflowError::validation(format!(
                                    "join node '{target}' does not exist"
                                )),
                                state,
                            );
                        }
                        debug!(join_node = %target, "join outside a fork, continuing at join node");
                        state = self.step_to(&state, &node_id, target);
                    }
                }
            }
        })
    }

    /// Invoke a node, turning a panic into an execution failure.
    async fn invoke(
        &self,
        node: &Arc<dyn WorkflowNode<T>>,
        state: &GraphWorkflowState<T>,
        lane: Lane,
    ) -> NodeOutcome<T> {
        let _permit = match lane {
            Lane::Main => None,
            Lane::Branch => match self.permits.acquire().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    return WorkflowResult::failure(WorkflowError::engine(
                        "parallelism semaphore closed",
                    ));
                }
            },
        };

        let span = debug_span!("node", node_id = %node.id());
        match AssertUnwindSafe(node.process(state))
            .catch_unwind()
            .instrument(span)
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(node_id = %node.id(), panic = %message, "node panicked");
                WorkflowResult::failure(WorkflowError::execution(
                    node.id().clone(),
                    format!("node panicked: {message}"),
                ))
            }
        }
    }

    fn apply_traverse(
        &self,
        state: &GraphWorkflowState<T>,
        from: &NodeId,
        traverse: Traverse<T>,
    ) -> Result<GraphWorkflowState<T>, WorkflowError> {
        let (target, updates, data) = traverse.into_parts();
        if !self.workflow.contains_node(&target) {
            return Err(WorkflowError::validation(format!(
                "traverse target '{target}' does not exist"
            )));
        }
        let mut next = apply_updates(self.step_to(state, from, target), updates);
        if let Some(data) = data {
            next = next.with_data(data);
        }
        Ok(next)
    }

    /// Move to `target`, recording the edge when an eligible one exists.
    pub(crate) fn step_to(
        &self,
        state: &GraphWorkflowState<T>,
        from: &NodeId,
        target: NodeId,
    ) -> GraphWorkflowState<T> {
        match self.workflow.edge_between(from, &target, state) {
            Some(edge) => state.traverse_edge(edge.id().clone(), target),
            None => state.move_to_node(target),
        }
    }

    async fn suspend(
        &self,
        state: GraphWorkflowState<T>,
        suspend: Suspend,
        node_id: &NodeId,
        lane: Lane,
    ) -> Flow<T> {
        let state = apply_updates(state, suspend.context_updates().cloned());
        if lane == Lane::Branch {
            return Flow::failed(
                WorkflowError::execution(
                    node_id.clone(),
                    "Suspend is not allowed inside a fork branch",
                ),
                state,
            );
        }

        let built = WorkflowSuspension::builder(suspend.suspension_id(), state.clone())
            .reason(suspend.reason())
            .timeout(suspend.timeout())
            .workflow_version(self.workflow.version())
            .metadata("node_id", json!(node_id.as_str()))
            .build();
        let suspension = match built {
            Ok(suspension) => suspension,
            Err(error) => return Flow::failed(error, state),
        };

        if let Err(error) = self.persist(&suspension).await {
            return Flow::failed(error, state);
        }
        info!(
            suspension_id = suspension.suspension_id(),
            reason = suspension.reason(),
            node_id = %node_id,
            "workflow suspended"
        );
        Flow::Suspended(suspension)
    }

    async fn persist(&self, suspension: &StateSuspension<T>) -> Result<(), WorkflowError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let state = suspension.suspended_state();
        let payload = self
            .serializer
            .serialize(state, suspension.workflow_version())?;
        let record =
            SuspensionRecord::from_suspension(suspension, state.workflow_id().clone(), payload);
        store.save(record).await
    }
}

fn apply_updates<T: Clone>(
    state: GraphWorkflowState<T>,
    updates: Option<WorkflowContext>,
) -> GraphWorkflowState<T> {
    match updates {
        Some(updates) if !updates.is_empty() => state.merge_context(&updates),
        _ => state,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::graph::GraphEdge;
    use crate::workflow::node::FnNode;
    use crate::workflow::store::InMemorySuspensionStore;
    use std::time::Duration;
    use trellis_kernel::workflow::{ContextKey, EdgeId, ExecutionStatus};

    fn id(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    fn ok(command: GraphCommand<u32>) -> NodeOutcome<u32> {
        WorkflowResult::success(command)
    }

    fn linear() -> GraphWorkflow<u32> {
        GraphWorkflow::builder("linear")
            .version("1.0.0")
            .add_node(FnNode::from_fn(id("A"), |_| ok(GraphCommand::traverse(id("B")))))
            .add_node(FnNode::from_fn(id("B"), |s| {
                let n = s.data().copied().unwrap_or(0);
                ok(Traverse::to(id("C")).with_data(n + 1).into())
            }))
            .add_node(FnNode::from_fn(id("C"), |s| {
                ok(GraphCommand::complete(s.data().copied().unwrap_or(0) * 10))
            }))
            .add_edge(GraphEdge::new(id("A"), id("B")).with_id(EdgeId::new("a-b").unwrap()))
            .start_at(id("A"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_linear_run_completes() {
        let engine = WorkflowEngine::new(linear());
        let execution = engine
            .run_detailed(GraphWorkflowState::start(WorkflowId::random(), id("A"), 4))
            .await;

        assert_eq!(execution.status(), ExecutionStatus::Completed);
        let state = execution.final_state().unwrap();
        let position = state.position().unwrap();
        assert_eq!(position.path_string(), "A -> B -> C");
        assert!(position.has_traversed_edge(&EdgeId::new("a-b").unwrap()));
        // two moves plus one payload replacement
        assert_eq!(state.version(), 4);

        match execution.into_result() {
            WorkflowResult::Success(result) => assert_eq!(result, 50),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_traverse_target_fails_with_validation() {
        let workflow = GraphWorkflow::builder("bad")
            .add_node(FnNode::from_fn(id("A"), |_| ok(GraphCommand::traverse(id("nowhere")))))
            .start_at(id("A"))
            .build()
            .unwrap();
        let result = WorkflowEngine::new(workflow)
            .start(WorkflowId::random(), 0)
            .await;
        assert!(result.error().unwrap().is_validation());
    }

    #[tokio::test]
    async fn test_step_limit_stops_infinite_loop() {
        let workflow = GraphWorkflow::builder("loop")
            .add_node(FnNode::from_fn(id("A"), |_| ok(GraphCommand::traverse(id("A")))))
            .start_at(id("A"))
            .build()
            .unwrap();
        let engine = WorkflowEngine::new(workflow).with_config(EngineConfig::default().with_max_steps(5));

        let execution = engine
            .run_detailed(GraphWorkflowState::start(WorkflowId::random(), id("A"), 0))
            .await;
        assert!(matches!(
            execution.error(),
            Some(WorkflowError::StepLimitExceeded { limit: 5 })
        ));
        let state = execution.final_state().unwrap();
        assert!(state.position().unwrap().has_cycle());
        assert_eq!(state.position().unwrap().visit_count(&id("A")), 6);
    }

    #[tokio::test]
    async fn test_panicking_node_becomes_execution_failure() {
        let workflow = GraphWorkflow::builder("panic")
            .add_node(FnNode::from_fn(id("A"), |_| -> NodeOutcome<u32> {
                panic!("gateway exploded")
            }))
            .start_at(id("A"))
            .build()
            .unwrap();
        let result = WorkflowEngine::new(workflow)
            .start(WorkflowId::random(), 0)
            .await;
        let error = result.error().unwrap();
        assert_eq!(error.node_id(), Some(&id("A")));
        assert!(error.to_string().contains("gateway exploded"));
    }

    #[tokio::test]
    async fn test_suspend_is_persisted_with_overrides() {
        let key = ContextKey::<String>::new("status").unwrap();
        let status = key.clone();
        let workflow = GraphWorkflow::builder("approval")
            .version("1.0.0")
            .add_node(FnNode::from_fn(id("A"), move |_| {
                let ctx = WorkflowContext::of(&status, "waiting".to_string()).unwrap();
                let suspend = Suspend::new("pay-1", "waiting")
                    .unwrap()
                    .with_timeout(Duration::from_secs(1800))
                    .with_context_updates(ctx);
                ok(suspend.into())
            }))
            .start_at(id("A"))
            .build()
            .unwrap();

        let store = InMemorySuspensionStore::new();
        let engine = WorkflowEngine::new(workflow).with_store(Arc::new(store.clone()));
        let result = engine.start(WorkflowId::new("wf-9").unwrap(), 1).await;

        let handle = result.suspension().unwrap();
        assert_eq!(handle.suspension_id(), "pay-1");
        assert_eq!(handle.reason(), "waiting");

        let suspension = result.workflow_suspension::<u32>().unwrap();
        assert_eq!(suspension.timeout(), Some(Duration::from_secs(1800)));
        assert_eq!(suspension.workflow_version(), "1.0.0");
        assert_eq!(suspension.suspended_state().get(&key).as_deref(), Some("waiting"));

        let record = store.load("pay-1").await.unwrap().unwrap();
        assert_eq!(record.workflow_id.as_str(), "wf-9");
        assert_eq!(record.timeout_ms, Some(1_800_000));
    }

    #[tokio::test]
    async fn test_node_failure_is_returned_not_raised() {
        let workflow = GraphWorkflow::builder("fail")
            .add_node(FnNode::from_fn(id("A"), |_| {
                WorkflowResult::failure(WorkflowError::execution(id("A"), "downstream refused"))
            }))
            .start_at(id("A"))
            .build()
            .unwrap();
        let execution = WorkflowEngine::new(workflow)
            .run_detailed(GraphWorkflowState::start(WorkflowId::random(), id("A"), 0u32))
            .await;
        assert_eq!(execution.status(), ExecutionStatus::Failed);
        assert_eq!(execution.final_state().unwrap().version(), 1);
    }

    #[tokio::test]
    async fn test_unpositioned_state_starts_at_start_node() {
        let engine = WorkflowEngine::new(linear());
        let template = GraphWorkflowState::unpositioned(WorkflowId::random(), Some(1));
        assert_eq!(engine.run(template).await.value(), Some(&20));
    }
}
