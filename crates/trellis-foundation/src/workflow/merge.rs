//! Context merge strategies used on resume.
//!
//! `WorkflowContext::merge` always lets the incoming side win. On resume the
//! caller picks how conflicts between the suspended context and the supplied
//! updates are handled, including refusing to resolve them.

use std::fmt;

use serde_json::Value;
use trellis_kernel::WorkflowError;
use trellis_kernel::workflow::{AnyContextKey, WorkflowContext};

/// Combines a suspended context with caller-supplied updates.
pub trait ContextMergeStrategy: Send + Sync {
    fn merge(
        &self,
        suspended: &WorkflowContext,
        incoming: &WorkflowContext,
    ) -> Result<WorkflowContext, WorkflowError>;

    fn name(&self) -> &str;
}

/// Incoming values win. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferIncoming;

impl ContextMergeStrategy for PreferIncoming {
    fn merge(
        &self,
        suspended: &WorkflowContext,
        incoming: &WorkflowContext,
    ) -> Result<WorkflowContext, WorkflowError> {
        Ok(suspended.merge(incoming))
    }

    fn name(&self) -> &str {
        "prefer_incoming"
    }
}

/// Suspended values win; incoming keys only fill gaps.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferSuspended;

impl ContextMergeStrategy for PreferSuspended {
    fn merge(
        &self,
        suspended: &WorkflowContext,
        incoming: &WorkflowContext,
    ) -> Result<WorkflowContext, WorkflowError> {
        Ok(incoming.merge(suspended))
    }

    fn name(&self) -> &str {
        "prefer_suspended"
    }
}

/// Any key bound to different values on both sides is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailOnConflict;

impl ContextMergeStrategy for FailOnConflict {
    fn merge(
        &self,
        suspended: &WorkflowContext,
        incoming: &WorkflowContext,
    ) -> Result<WorkflowContext, WorkflowError> {
        let conflicts = suspended.conflicts_with(incoming);
        if !conflicts.is_empty() {
            return Err(conflict_error(&conflicts));
        }
        Ok(suspended.merge(incoming))
    }

    fn name(&self) -> &str {
        "fail_on_conflict"
    }
}

/// Resolves each conflicting key with a caller function.
///
/// The resolver receives the key, the suspended value and the incoming
/// value. Returning `None` leaves the key unresolved, which fails the merge.
pub struct ResolveWith<F> {
    resolver: F,
}

impl<F> ResolveWith<F>
where
    F: Fn(&AnyContextKey, &Value, &Value) -> Option<Value> + Send + Sync,
{
    pub fn new(resolver: F) -> Self {
        Self { resolver }
    }
}

impl<F> fmt::Debug for ResolveWith<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveWith").finish_non_exhaustive()
    }
}

impl<F> ContextMergeStrategy for ResolveWith<F>
where
    F: Fn(&AnyContextKey, &Value, &Value) -> Option<Value> + Send + Sync,
{
    fn merge(
        &self,
        suspended: &WorkflowContext,
        incoming: &WorkflowContext,
    ) -> Result<WorkflowContext, WorkflowError> {
        let mut merged = suspended.merge(incoming);
        let mut unresolved = Vec::new();

        for key in suspended.conflicts_with(incoming) {
            let (Some(ours), Some(theirs)) = (suspended.get_raw(&key), incoming.get_raw(&key))
            else {
                continue;
            };
            match (self.resolver)(&key, ours, theirs) {
                Some(value) => merged = merged.with_raw(key, value)?,
                None => unresolved.push(key),
            }
        }

        if !unresolved.is_empty() {
            return Err(conflict_error(&unresolved));
        }
        Ok(merged)
    }

    fn name(&self) -> &str {
        "resolve_with"
    }
}

fn conflict_error(keys: &[AnyContextKey]) -> WorkflowError {
    WorkflowError::ContextConflict {
        keys: keys.iter().map(|k| k.name().to_string()).collect(),
    }
}
