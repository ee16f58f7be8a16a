//! Trellis Kernel
//!
//! Types and contracts for durable, graph-structured workflows: identifiers,
//! the typed context store, graph positions, versioned workflow state, the
//! command protocol nodes use to talk to the engine, the three-way result
//! channel, and the suspension model. Concrete engines live in
//! `trellis-foundation`.

// error module
pub mod error;
pub use error::{ErrorKind, WorkflowError, WorkflowOutcome};

// workflow module
pub mod workflow;
