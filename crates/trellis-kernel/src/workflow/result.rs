//! Result Channel
//!
//! [`WorkflowResult`] is the three-way outcome of every node invocation and
//! every engine entry point. Failure and suspension are values, not control
//! flow: nothing in the core unwinds to report them.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Opaque descriptor of a suspended workflow.
///
/// The engine stores a
/// [`WorkflowSuspension`](crate::workflow::WorkflowSuspension) behind the
/// type-erased `state`; callers recover it with [`SuspensionHandle::state`].
#[derive(Clone)]
pub struct SuspensionHandle {
    suspension_id: String,
    reason: String,
    state: Arc<dyn Any + Send + Sync>,
}

impl SuspensionHandle {
    pub fn new<S: Any + Send + Sync>(
        suspension_id: impl Into<String>,
        reason: impl Into<String>,
        state: S,
    ) -> Self {
        Self {
            suspension_id: suspension_id.into(),
            reason: reason.into(),
            state: Arc::new(state),
        }
    }

    pub fn suspension_id(&self) -> &str {
        &self.suspension_id
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Downcast the suspended state descriptor.
    pub fn state<S: Any>(&self) -> Option<&S> {
        self.state.downcast_ref::<S>()
    }
}

impl fmt::Debug for SuspensionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspensionHandle")
            .field("suspension_id", &self.suspension_id)
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

impl PartialEq for SuspensionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.suspension_id == other.suspension_id
            && self.reason == other.reason
            && Arc::ptr_eq(&self.state, &other.state)
    }
}

/// Why a value could not be extracted from a [`WorkflowResult`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowResultError<E> {
    #[error("workflow failed: {0}")]
    Failed(E),

    #[error("workflow suspended ({suspension_id}): {reason}")]
    Suspended { suspension_id: String, reason: String },
}

/// Outcome of a node invocation or an engine run.
#[derive(Debug, Clone)]
pub enum WorkflowResult<V, E> {
    Success(V),
    Failure(E),
    Suspended(SuspensionHandle),
}

impl<V, E> WorkflowResult<V, E> {
    pub fn success(value: V) -> Self {
        Self::Success(value)
    }

    pub fn failure(error: E) -> Self {
        Self::Failure(error)
    }

    pub fn suspended<S: Any + Send + Sync>(
        suspension_id: impl Into<String>,
        reason: impl Into<String>,
        state: S,
    ) -> Self {
        Self::Suspended(SuspensionHandle::new(suspension_id, reason, state))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended(_))
    }

    pub fn value(&self) -> Option<&V> {
        match self {
            Self::Success(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Failure(e) => Some(e),
            _ => None,
        }
    }

    pub fn suspension(&self) -> Option<&SuspensionHandle> {
        match self {
            Self::Suspended(handle) => Some(handle),
            _ => None,
        }
    }

    /// Transform a success value.
    pub fn map<U, F>(self, f: F) -> WorkflowResult<U, E>
    where
        F: FnOnce(V) -> U,
    {
        match self {
            Self::Success(v) => WorkflowResult::Success(f(v)),
            Self::Failure(e) => WorkflowResult::Failure(e),
            Self::Suspended(s) => WorkflowResult::Suspended(s),
        }
    }

    /// Chain a computation that may itself fail or suspend.
    pub fn flat_map<U, F>(self, f: F) -> WorkflowResult<U, E>
    where
        F: FnOnce(V) -> WorkflowResult<U, E>,
    {
        match self {
            Self::Success(v) => f(v),
            Self::Failure(e) => WorkflowResult::Failure(e),
            Self::Suspended(s) => WorkflowResult::Suspended(s),
        }
    }

    /// Turn a success that fails `predicate` into a failure built by `error`.
    pub fn filter<P, F>(self, predicate: P, error: F) -> Self
    where
        P: FnOnce(&V) -> bool,
        F: FnOnce(V) -> E,
    {
        match self {
            Self::Success(v) if predicate(&v) => Self::Success(v),
            Self::Success(v) => Self::Failure(error(v)),
            other => other,
        }
    }

    pub fn map_error<E2, F>(self, f: F) -> WorkflowResult<V, E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::Success(v) => WorkflowResult::Success(v),
            Self::Failure(e) => WorkflowResult::Failure(f(e)),
            Self::Suspended(s) => WorkflowResult::Suspended(s),
        }
    }

    /// Replace a failure with a success value.
    pub fn recover<F>(self, f: F) -> Self
    where
        F: FnOnce(E) -> V,
    {
        match self {
            Self::Failure(e) => Self::Success(f(e)),
            other => other,
        }
    }

    /// Replace a failure with another result, which may fail again.
    pub fn recover_with<F>(self, f: F) -> Self
    where
        F: FnOnce(E) -> Self,
    {
        match self {
            Self::Failure(e) => f(e),
            other => other,
        }
    }

    pub fn on_success<F: FnOnce(&V)>(self, f: F) -> Self {
        if let Self::Success(v) = &self {
            f(v);
        }
        self
    }

    pub fn on_failure<F: FnOnce(&E)>(self, f: F) -> Self {
        if let Self::Failure(e) = &self {
            f(e);
        }
        self
    }

    pub fn on_suspension<F: FnOnce(&SuspensionHandle)>(self, f: F) -> Self {
        if let Self::Suspended(s) = &self {
            f(s);
        }
        self
    }

    pub fn get_or_else(self, default: V) -> V {
        match self {
            Self::Success(v) => v,
            _ => default,
        }
    }

    pub fn get_or_else_with<F: FnOnce() -> V>(self, f: F) -> V {
        match self {
            Self::Success(v) => v,
            _ => f(),
        }
    }

    /// Extract the value, describing which case prevented it otherwise.
    pub fn try_into_value(self) -> Result<V, WorkflowResultError<E>> {
        match self {
            Self::Success(v) => Ok(v),
            Self::Failure(e) => Err(WorkflowResultError::Failed(e)),
            Self::Suspended(s) => Err(WorkflowResultError::Suspended {
                suspension_id: s.suspension_id,
                reason: s.reason,
            }),
        }
    }

    /// Combine two successes; the first non-success short-circuits.
    pub fn combine<U, R, F>(self, other: WorkflowResult<U, E>, f: F) -> WorkflowResult<R, E>
    where
        F: FnOnce(V, U) -> R,
    {
        match (self, other) {
            (Self::Success(a), WorkflowResult::Success(b)) => WorkflowResult::Success(f(a, b)),
            (Self::Failure(e), _) => WorkflowResult::Failure(e),
            (Self::Suspended(s), _) => WorkflowResult::Suspended(s),
            (Self::Success(_), WorkflowResult::Failure(e)) => WorkflowResult::Failure(e),
            (Self::Success(_), WorkflowResult::Suspended(s)) => WorkflowResult::Suspended(s),
        }
    }
}

impl<V, E> From<Result<V, E>> for WorkflowResult<V, E> {
    fn from(result: Result<V, E>) -> Self {
        match result {
            Ok(v) => Self::Success(v),
            Err(e) => Self::Failure(e),
        }
    }
}

impl<V: PartialEq, E: PartialEq> PartialEq for WorkflowResult<V, E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Success(a), Self::Success(b)) => a == b,
            (Self::Failure(a), Self::Failure(b)) => a == b,
            (Self::Suspended(a), Self::Suspended(b)) => a == b,
            _ => false,
        }
    }
}
