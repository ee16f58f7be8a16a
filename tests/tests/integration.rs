use std::sync::Arc;
use std::time::Duration;

use trellis_foundation::workflow::{GraphEdge, GraphWorkflow, ResumeOptions, WorkflowEngine};
use trellis_foundation::{EngineConfig, LoggingConfig, init_logging};
use trellis_kernel::workflow::{
    Condition, ContextKey, EdgeCondition, EdgeId, GraphCommand, GraphWorkflowState, Join,
    JoinStrategy, NodeOutcome, Suspend, Traverse, WorkflowContext, WorkflowId, WorkflowResult,
};
use trellis_kernel::{ErrorKind, WorkflowError};
use trellis_testing::{RecordingStore, ScriptedNode, StoreCall, node_id};

fn edge(id: &str) -> EdgeId {
    EdgeId::new(id).unwrap()
}

fn text(name: &str) -> ContextKey<String> {
    ContextKey::new(name).unwrap()
}

fn amount() -> ContextKey<f64> {
    ContextKey::new("amount").unwrap()
}

fn suspend_payment() -> NodeOutcome<String> {
    let suspend = Suspend::new("pay-1", "waiting")
        .unwrap()
        .with_timeout(Duration::from_secs(30 * 60));
    WorkflowResult::success(suspend.into())
}

/// `pay` suspends once, then completes with "paid".
async fn payment_workflow(version: &str) -> GraphWorkflow<String> {
    let pay = ScriptedNode::completing(node_id("pay"), "paid".to_string());
    pay.then(suspend_payment()).await;
    GraphWorkflow::builder("payments")
        .version(version)
        .add_node(pay)
        .start_at(node_id("pay"))
        .build()
        .unwrap()
}

#[test]
fn test_position_tracks_cycles() {
    let state = GraphWorkflowState::start(WorkflowId::random(), node_id("A"), ())
        .traverse_edge(edge("e1"), node_id("B"))
        .traverse_edge(edge("e2"), node_id("C"))
        .move_to_node(node_id("A"));

    let position = state.position().unwrap();
    assert_eq!(
        position.path(),
        &[node_id("A"), node_id("B"), node_id("C"), node_id("A")]
    );
    assert_eq!(position.depth(), 3);
    assert!(position.has_cycle());
    assert_eq!(position.visit_count(&node_id("A")), 2);
    assert!(position.has_traversed_edge(&edge("e1")));
    assert_eq!(state.version(), 4);
}

#[tokio::test]
async fn test_suspension_expires_after_timeout() {
    let engine = WorkflowEngine::new(payment_workflow("1.0.0").await);
    let result = engine.start(WorkflowId::random(), "order-7".to_string()).await;

    let handle = result.suspension().unwrap();
    assert_eq!(handle.suspension_id(), "pay-1");
    assert_eq!(handle.reason(), "waiting");

    let suspension = result.workflow_suspension::<String>().unwrap();
    assert_eq!(suspension.suspended_state().data().map(String::as_str), Some("order-7"));

    let later = suspension.suspended_at() + chrono::Duration::minutes(31);
    assert!(suspension.is_expired_at(later));
    assert_eq!(suspension.remaining_time_at(later), Some(Duration::ZERO));
    assert!(!suspension.is_expired_at(suspension.suspended_at()));
}

#[tokio::test]
async fn test_resume_against_new_major_version_is_rejected() {
    let store = RecordingStore::new();
    let old = WorkflowEngine::new(payment_workflow("1.0.0").await)
        .with_store(Arc::new(store.clone()));
    assert!(old.start(WorkflowId::random(), String::new()).await.is_suspended());

    let new = WorkflowEngine::new(payment_workflow("2.0.0").await)
        .with_store(Arc::new(store.clone()));
    let result = new.resume_from_store("pay-1", ResumeOptions::new()).await;

    let error = result.error().unwrap();
    assert_eq!(error.kind(), ErrorKind::VersionMismatch);
    // a rejected resume leaves the record in place
    assert_eq!(
        store.calls().await,
        vec![
            StoreCall::Save("pay-1".to_string()),
            StoreCall::Load("pay-1".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_resume_from_store_round_trip() {
    let store = RecordingStore::new();
    let engine = WorkflowEngine::new(payment_workflow("1.0.0").await)
        .with_store(Arc::new(store.clone()));

    assert!(engine.start(WorkflowId::random(), String::new()).await.is_suspended());
    let resumed = engine
        .resume_from_store("pay-1", ResumeOptions::new())
        .await;

    assert_eq!(resumed.value().map(String::as_str), Some("paid"));
    assert_eq!(
        store.calls().await,
        vec![
            StoreCall::Save("pay-1".to_string()),
            StoreCall::Load("pay-1".to_string()),
            StoreCall::Remove("pay-1".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_store_failure_fails_the_run() {
    let store = RecordingStore::new();
    store.fail_saves(true);
    let engine = WorkflowEngine::new(payment_workflow("1.0.0").await)
        .with_store(Arc::new(store.clone()));

    let execution = engine
        .run_detailed(GraphWorkflowState::start(
            WorkflowId::random(),
            node_id("pay"),
            String::new(),
        ))
        .await;
    assert_eq!(execution.error().unwrap().kind(), ErrorKind::Storage);
    assert!(store.inner().is_empty().await);
}

#[test]
fn test_numeric_condition_and_negation() {
    let state = GraphWorkflowState::start_with_context(
        WorkflowId::random(),
        node_id("review"),
        Some(()),
        WorkflowContext::of(&amount(), 1500.0).unwrap(),
    );
    let large = Condition::when_context_greater_than(amount(), 1000.0);

    assert!(large.evaluate(&state));
    assert!(!large.clone().not().evaluate(&state));
}

#[test]
fn test_conditioned_edges_route_by_priority() {
    let workflow = GraphWorkflow::<()>::builder("review")
        .add_node(ScriptedNode::completing(node_id("review"), ()))
        .add_node(ScriptedNode::completing(node_id("manual"), ()))
        .add_node(ScriptedNode::completing(node_id("auto"), ()))
        .add_edge(
            GraphEdge::new(node_id("review"), node_id("manual"))
                .with_condition(Condition::when_context_greater_than(amount(), 1000.0))
                .with_priority(10),
        )
        .add_edge(GraphEdge::new(node_id("review"), node_id("auto")))
        .start_at(node_id("review"))
        .build()
        .unwrap();

    let large = GraphWorkflowState::start_with_context(
        WorkflowId::random(),
        node_id("review"),
        None,
        WorkflowContext::of(&amount(), 1500.0).unwrap(),
    );
    let small = large
        .with_context_value(&amount(), 20.0)
        .unwrap();

    assert_eq!(workflow.select_edge(&large).unwrap().to(), &node_id("manual"));
    assert_eq!(workflow.select_edge(&small).unwrap().to(), &node_id("auto"));
}

fn branch(name: &str, writes: &[(&str, &str)]) -> ScriptedNode<u32> {
    let mut updates = WorkflowContext::empty();
    for (key, value) in writes {
        updates = updates.with(&text(key), value.to_string()).unwrap();
    }
    ScriptedNode::new(
        node_id(name),
        WorkflowResult::success(GraphCommand::Traverse(
            Traverse::to(node_id("K")).with_context_updates(updates),
        )),
    )
}

#[tokio::test]
async fn test_parallel_fork_joins_both_branches() {
    let b = branch("B", &[("from_b", "yes"), ("winner", "B")]);
    let c = branch("C", &[("from_c", "yes"), ("winner", "C")]);
    let fork = ScriptedNode::new(
        node_id("F"),
        WorkflowResult::success(GraphCommand::fork([node_id("B"), node_id("C")]).unwrap()),
    );
    let joiner = ScriptedNode::new(
        node_id("K"),
        WorkflowResult::success(GraphCommand::Join(Join::at(node_id("J"), JoinStrategy::WaitAll))),
    );
    let done = ScriptedNode::completing(node_id("J"), 0);

    let workflow = GraphWorkflow::builder("fan-out")
        .add_node(fork)
        .add_node(b.clone())
        .add_node(c.clone())
        .add_node(joiner.clone())
        .add_node(done.clone())
        .start_at(node_id("F"))
        .build()
        .unwrap();

    let engine = WorkflowEngine::new(workflow);
    let execution = engine
        .run_detailed(GraphWorkflowState::start(WorkflowId::random(), node_id("F"), 1))
        .await;
    let state = execution.final_state().unwrap();

    assert_eq!(state.get(&text("from_b")).as_deref(), Some("yes"));
    assert_eq!(state.get(&text("from_c")).as_deref(), Some("yes"));
    assert_eq!(state.get(&text("winner")).as_deref(), Some("C"));

    trellis_testing::assert_node_called!(b, 1);
    trellis_testing::assert_node_called!(c, 1);
    trellis_testing::assert_node_called!(joiner, 2);
    trellis_testing::assert_node_called!(done, 1);
}

#[tokio::test]
async fn test_each_step_sees_exactly_one_more_version() {
    let a = ScriptedNode::traversing(node_id("A"), node_id("B"));
    let b = ScriptedNode::traversing(node_id("B"), node_id("C"));
    let c = ScriptedNode::completing(node_id("C"), "done".to_string());
    let workflow = GraphWorkflow::builder("linear")
        .add_node(a.clone())
        .add_node(b.clone())
        .add_node(c.clone())
        .connect(node_id("A"), node_id("B"))
        .start_at(node_id("A"))
        .build()
        .unwrap();

    let result = WorkflowEngine::new(workflow)
        .start(WorkflowId::random(), String::new())
        .await;
    assert_eq!(result.value().map(String::as_str), Some("done"));

    let seen: Vec<u64> = [&a, &b, &c]
        .iter()
        .map(|node| node.call_history.try_read().unwrap()[0].version())
        .collect();
    assert_eq!(seen, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_revisiting_a_node_is_bounded_by_step_limit() {
    let a = ScriptedNode::traversing(node_id("A"), node_id("B"));
    let b = ScriptedNode::traversing(node_id("B"), node_id("A"));
    let workflow = GraphWorkflow::<()>::builder("ping-pong")
        .add_node(a.clone())
        .add_node(b)
        .start_at(node_id("A"))
        .build()
        .unwrap();
    let engine = WorkflowEngine::new(workflow).with_config(EngineConfig::default().with_max_steps(10));

    let execution = engine
        .run_detailed(GraphWorkflowState::start(WorkflowId::random(), node_id("A"), ()))
        .await;
    assert!(matches!(
        execution.error(),
        Some(WorkflowError::StepLimitExceeded { limit: 10 })
    ));
    assert!(execution.final_state().unwrap().position().unwrap().has_cycle());
    trellis_testing::assert_node_called!(a, 5);
}

#[test]
fn test_result_functor_laws() {
    let success: WorkflowResult<i32, String> = WorkflowResult::success(3);
    assert_eq!(success.clone().map(|v| v), success);

    let failure: WorkflowResult<i32, String> = WorkflowResult::failure("boom".to_string());
    assert_eq!(failure.clone().map(|v| v + 1), failure);
    assert_eq!(
        failure.clone().flat_map(|v| WorkflowResult::success(v * 2)),
        failure
    );
    assert_eq!(failure.clone().filter(|_| false, |_| "rejected".to_string()), failure);

    let suspended: WorkflowResult<i32, String> =
        WorkflowResult::suspended("s-1", "waiting", ());
    assert!(suspended.clone().map(|v| v + 1).is_suspended());
    assert_eq!(suspended.clone().map(|v| v + 1), suspended.clone().map(|v| v + 1));
    assert!(suspended.filter(|_| false, |_| "rejected".to_string()).is_suspended());
}

#[test]
fn test_logging_initializes_once() {
    let config = LoggingConfig::default();
    init_logging(&config);
    assert!(!init_logging(&config));
}
