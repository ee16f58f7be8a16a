//! Crate-level error types for `trellis-kernel`.
//!
//! Every runtime failure travels as the `E` of a
//! [`WorkflowResult`](crate::workflow::WorkflowResult); nothing in the core
//! panics or unwinds past the engine boundary. The only eagerly signalled
//! errors are constructor failures such as an empty [`NodeId`].

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::workflow::context::ContextError;
use crate::workflow::id::{IdError, NodeId};
use crate::workflow::result::WorkflowResult;

/// Outcome alias used by every engine-level entry point.
pub type WorkflowOutcome<V> = WorkflowResult<V, WorkflowError>;

/// Workflow error taxonomy.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum WorkflowError {
    /// Bad input shape: missing node, malformed command, unknown suspension.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Context store rejected a key or value. Treated as a validation error.
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    /// An identifier failed construction. Treated as a validation error.
    #[error("Invalid identifier: {0}")]
    Id(#[from] IdError),

    /// A node's processing step raised an unexpected fault.
    #[error("Execution failed{}: {message}", display_node(.node_id))]
    Execution {
        node_id: Option<NodeId>,
        message: String,
        cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    /// A suspension was resumed against an incompatible workflow version.
    #[error("Workflow version mismatch: suspended at {actual}, current is {expected}")]
    VersionMismatch { expected: String, actual: String },

    /// A merge strategy found conflicting keys it was told not to resolve.
    #[error("Unresolved context conflicts on keys: {}", .keys.join(", "))]
    ContextConflict { keys: Vec<String> },

    /// State could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The suspension store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A barrier or other bounded wait elapsed.
    #[error("{operation} timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// The dispatch loop ran more steps than configured.
    #[error("Step limit of {limit} exceeded")]
    StepLimitExceeded { limit: u32 },
}

fn display_node(node_id: &Option<NodeId>) -> String {
    match node_id {
        Some(node) => format!(" at node '{node}'"),
        None => String::new(),
    }
}

impl WorkflowError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an execution error attributed to a node
    pub fn execution(node_id: NodeId, message: impl Into<String>) -> Self {
        Self::Execution {
            node_id: Some(node_id),
            message: message.into(),
            cause: None,
        }
    }

    /// Create an execution error raised by the engine itself
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Execution {
            node_id: None,
            message: message.into(),
            cause: None,
        }
    }

    /// Create an execution error that keeps the underlying cause
    pub fn execution_with_cause<C>(node_id: NodeId, message: impl Into<String>, cause: C) -> Self
    where
        C: std::error::Error + Send + Sync + 'static,
    {
        Self::Execution {
            node_id: Some(node_id),
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }

    /// Create a version mismatch error
    pub fn version_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::VersionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Whether this is a validation-class error (bad input shape).
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Context(_) | Self::Id(_))
    }

    /// Node the failure originated from, when known.
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            Self::Execution { node_id, .. } => node_id.as_ref(),
            _ => None,
        }
    }

    /// Underlying cause of an execution failure, when one was captured.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync)> {
        match self {
            Self::Execution { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }

    /// Short, stable name of the error kind (useful as a log field).
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Context(_) | Self::Id(_) => ErrorKind::Validation,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::VersionMismatch { .. } => ErrorKind::VersionMismatch,
            Self::ContextConflict { .. } => ErrorKind::ContextConflict,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::StepLimitExceeded { .. } => ErrorKind::StepLimit,
        }
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        WorkflowError::Serialization(err.to_string())
    }
}

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Execution,
    VersionMismatch,
    ContextConflict,
    Serialization,
    Storage,
    Timeout,
    StepLimit,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Execution => "execution",
            Self::VersionMismatch => "version_mismatch",
            Self::ContextConflict => "context_conflict",
            Self::Serialization => "serialization",
            Self::Storage => "storage",
            Self::Timeout => "timeout",
            Self::StepLimit => "step_limit",
        };
        f.write_str(name)
    }
}
