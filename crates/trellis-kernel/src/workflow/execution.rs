//! Execution lifecycle
//!
//! `Running -> {Completed | Failed | Suspended}`, `Suspended -> Running`.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::result::{SuspensionHandle, WorkflowResult};
use super::state::GraphWorkflowState;
use super::suspension::StateSuspension;
use crate::error::WorkflowError;

/// Lifecycle status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Suspended,
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Running, Completed) | (Running, Failed) | (Running, Suspended) | (Suspended, Running)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Detailed outcome of a run, keeping the last state snapshot for audit.
#[derive(Debug, Clone)]
pub enum WorkflowExecution<T> {
    Completed {
        result: T,
        state: GraphWorkflowState<T>,
    },
    Failed {
        error: WorkflowError,
        /// Missing when the failure happened before a state existed.
        state: Option<GraphWorkflowState<T>>,
    },
    Suspended(StateSuspension<T>),
}

impl<T> WorkflowExecution<T> {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            Self::Completed { .. } => ExecutionStatus::Completed,
            Self::Failed { .. } => ExecutionStatus::Failed,
            Self::Suspended(_) => ExecutionStatus::Suspended,
        }
    }

    /// Last state snapshot the engine produced.
    pub fn final_state(&self) -> Option<&GraphWorkflowState<T>> {
        match self {
            Self::Completed { state, .. } => Some(state),
            Self::Failed { state, .. } => state.as_ref(),
            Self::Suspended(suspension) => Some(suspension.suspended_state()),
        }
    }

    pub fn error(&self) -> Option<&WorkflowError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl<T: Send + Sync + 'static> WorkflowExecution<T> {
    /// Collapse into the result channel. A suspension is carried as the
    /// handle's state and can be recovered with
    /// [`WorkflowResult::workflow_suspension`].
    pub fn into_result(self) -> WorkflowResult<T, WorkflowError> {
        match self {
            Self::Completed { result, .. } => WorkflowResult::Success(result),
            Self::Failed { error, .. } => WorkflowResult::Failure(error),
            Self::Suspended(suspension) => {
                let id = suspension.suspension_id().to_string();
                let reason = suspension.reason().to_string();
                WorkflowResult::Suspended(SuspensionHandle::new(id, reason, suspension))
            }
        }
    }
}

impl<V, E> WorkflowResult<V, E> {
    /// Suspension captured by the engine, when this is a suspended result.
    pub fn workflow_suspension<T: 'static>(&self) -> Option<&StateSuspension<T>> {
        self.suspension()?.state::<StateSuspension<T>>()
    }
}
