//! Workflow Module
//!
//! Core abstractions for durable graph workflows:
//!
//! - **Identifiers**: validated [`NodeId`], [`EdgeId`], [`WorkflowId`]
//! - **Typed context**: [`ContextKey`] slots in an immutable [`WorkflowContext`]
//! - **Position**: [`GraphPosition`] with full visit history and cycle detection
//! - **State**: versioned, immutable [`GraphWorkflowState`] snapshots
//! - **Commands**: the closed [`GraphCommand`] set a node returns to the engine
//! - **Results**: the three-way [`WorkflowResult`] channel
//! - **Suspension**: [`WorkflowSuspension`] and the persistence contracts
//!
//! # Architecture
//!
//! This module defines types and traits only (kernel layer). The dispatch
//! engine, fork/join executor and resume protocol live in `trellis-foundation`.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_kernel::workflow::{GraphCommand, GraphWorkflowState, NodeId, WorkflowResult};
//!
//! async fn review(state: GraphWorkflowState<Order>) -> NodeOutcome<Order> {
//!     if state.data().is_some_and(|o| o.total > 1_000.0) {
//!         return GraphCommand::suspend("approval-42", "manual approval required").into();
//!     }
//!     WorkflowResult::success(GraphCommand::traverse(NodeId::new("ship")?))
//! }
//! ```

pub mod command;
pub mod condition;
pub mod context;
pub mod execution;
pub mod id;
pub mod node;
pub mod position;
pub mod result;
pub mod serializer;
pub mod state;
pub mod store;
pub mod suspension;

// Re-export public API
pub use command::{
    CommandKind, Complete, Fork, ForkStrategy, GraphCommand, Join, JoinStrategy, Suspend, Traverse,
};
pub use condition::{Condition, EdgeCondition};
pub use context::{AnyContextKey, ContextError, ContextKey, ContextValue, ValueType, WorkflowContext};
pub use execution::{ExecutionStatus, WorkflowExecution};
pub use id::{EdgeId, IdError, NodeId, WorkflowId};
pub use node::{NodeOutcome, WorkflowNode};
pub use position::GraphPosition;
pub use result::{SuspensionHandle, WorkflowResult, WorkflowResultError};
pub use serializer::{StateMigration, StateSerializer};
pub use state::{GraphWorkflowState, Payload, StateMetadata};
pub use store::{SuspensionRecord, SuspensionStore};
pub use suspension::{StateSuspension, SuspensionBuilder, WorkflowSuspension};
