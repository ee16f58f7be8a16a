//! Workflow Engine
//!
//! - [`GraphWorkflow`]: read-only graph of nodes and conditioned edges
//! - [`WorkflowEngine`]: dispatch loop with fork/join and suspension
//! - [`ResumeOptions`]: how a suspended state is reconstituted
//! - [`ContextMergeStrategy`]: conflict-aware context merging on resume
//! - [`JsonStateSerializer`] and [`InMemorySuspensionStore`]: default
//!   persistence plumbing
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_foundation::workflow::{FnNode, GraphWorkflow, WorkflowEngine};
//!
//! let workflow = GraphWorkflow::builder("orders")
//!     .version("1.0.0")
//!     .add_node(FnNode::from_fn(intake, |s| ...))
//!     .add_node(FnNode::from_fn(ship, |s| ...))
//!     .connect(intake.clone(), ship.clone())
//!     .start_at(intake)
//!     .build()?;
//!
//! let engine = WorkflowEngine::new(workflow);
//! match engine.start(WorkflowId::random(), order).await {
//!     WorkflowResult::Success(order) => { /* done */ }
//!     WorkflowResult::Suspended(handle) => { /* persist handle.suspension_id() */ }
//!     WorkflowResult::Failure(e) => { /* report */ }
//! }
//! ```

mod budget;
mod engine;
mod fork;
mod graph;
mod merge;
mod node;
mod resume;
mod serializer;
mod store;

pub use engine::WorkflowEngine;
pub use graph::{GraphEdge, GraphWorkflow, GraphWorkflowBuilder};
pub use merge::{ContextMergeStrategy, FailOnConflict, PreferIncoming, PreferSuspended, ResolveWith};
pub use node::FnNode;
pub use resume::ResumeOptions;
pub use serializer::{JsonStateSerializer, semver_compatible};
pub use store::InMemorySuspensionStore;
