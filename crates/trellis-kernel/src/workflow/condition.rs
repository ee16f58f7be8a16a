//! Edge conditions
//!
//! Predicates over a workflow state deciding whether an edge is eligible.
//! A condition that errors is treated as "does not match" by
//! [`EdgeCondition::evaluate`]; the error never aborts the workflow.

use std::fmt;
use std::sync::Arc;

use super::context::{ContextKey, ContextValue};
use super::id::NodeId;
use super::state::GraphWorkflowState;
use crate::error::WorkflowError;

/// Edge condition contract
pub trait EdgeCondition<T>: Send + Sync {
    /// Test the condition; errors are reported, not swallowed.
    fn test(&self, state: &GraphWorkflowState<T>) -> Result<bool, WorkflowError>;

    /// Human-readable description
    fn description(&self) -> String;

    /// Test the condition, treating any error as `false`.
    fn evaluate(&self, state: &GraphWorkflowState<T>) -> bool {
        match self.test(state) {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!(
                    condition = %self.description(),
                    error = %e,
                    "edge condition failed, treating as non-matching"
                );
                false
            }
        }
    }
}

type Predicate<T> = dyn Fn(&GraphWorkflowState<T>) -> Result<bool, WorkflowError> + Send + Sync;

struct FnCondition<T> {
    description: String,
    predicate: Box<Predicate<T>>,
}

impl<T> EdgeCondition<T> for FnCondition<T> {
    fn test(&self, state: &GraphWorkflowState<T>) -> Result<bool, WorkflowError> {
        (self.predicate)(state)
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

/// Shareable, composable edge condition.
///
/// `always()` is the identity of `and` and `never()` its absorbing element;
/// the roles swap for `or`.
pub struct Condition<T> {
    inner: Arc<dyn EdgeCondition<T>>,
}

impl<T> Clone for Condition<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Condition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Condition({})", self.inner.description())
    }
}

impl<T: 'static> Condition<T> {
    /// Wrap any [`EdgeCondition`] implementation.
    pub fn new(condition: impl EdgeCondition<T> + 'static) -> Self {
        Self {
            inner: Arc::new(condition),
        }
    }

    /// Fallible predicate.
    pub fn try_from_fn<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&GraphWorkflowState<T>) -> Result<bool, WorkflowError> + Send + Sync + 'static,
    {
        Self::new(FnCondition {
            description: description.into(),
            predicate: Box::new(predicate),
        })
    }

    pub fn from_fn<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&GraphWorkflowState<T>) -> bool + Send + Sync + 'static,
    {
        Self::try_from_fn(description, move |state| Ok(predicate(state)))
    }

    pub fn always() -> Self {
        Self::from_fn("always", |_| true)
    }

    pub fn never() -> Self {
        Self::from_fn("never", |_| false)
    }

    /// Matches when `key` is bound in the context.
    pub fn when_context_present<V: ContextValue>(key: ContextKey<V>) -> Self {
        let description = format!("context has '{}'", key.name());
        Self::from_fn(description, move |state| state.context().contains(&key))
    }

    /// Matches when `key` holds `expected`.
    pub fn when_context_equals<V>(key: ContextKey<V>, expected: V) -> Self
    where
        V: ContextValue + PartialEq,
    {
        let description = format!("context '{}' equals expected value", key.name());
        Self::try_from_fn(description, move |state| {
            Ok(lookup(state, &key)?.is_some_and(|v| v == expected))
        })
    }

    /// Matches when `key` holds a value strictly greater than `threshold`.
    pub fn when_context_greater_than<V>(key: ContextKey<V>, threshold: V) -> Self
    where
        V: ContextValue + PartialOrd + fmt::Debug,
    {
        let description = format!("context '{}' > {:?}", key.name(), threshold);
        Self::try_from_fn(description, move |state| {
            Ok(lookup(state, &key)?.is_some_and(|v| v > threshold))
        })
    }

    /// Matches when `key` holds a value strictly less than `threshold`.
    pub fn when_context_less_than<V>(key: ContextKey<V>, threshold: V) -> Self
    where
        V: ContextValue + PartialOrd + fmt::Debug,
    {
        let description = format!("context '{}' < {:?}", key.name(), threshold);
        Self::try_from_fn(description, move |state| {
            Ok(lookup(state, &key)?.is_some_and(|v| v < threshold))
        })
    }

    /// Matches when a payload is present and satisfies `predicate`.
    pub fn when_data<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self::from_fn(description, move |state| state.data().is_some_and(&predicate))
    }

    /// Matches once `node` appears in the visit history.
    pub fn when_visited(node: NodeId) -> Self {
        let description = format!("visited '{node}'");
        Self::from_fn(description, move |state| {
            state.position().is_some_and(|p| p.has_visited(&node))
        })
    }

    pub fn and(self, other: Condition<T>) -> Self {
        let description = format!("({} AND {})", self.description(), other.description());
        Self::try_from_fn(description, move |state| {
            Ok(self.test(state)? && other.test(state)?)
        })
    }

    pub fn or(self, other: Condition<T>) -> Self {
        let description = format!("({} OR {})", self.description(), other.description());
        Self::try_from_fn(description, move |state| {
            Ok(self.test(state)? || other.test(state)?)
        })
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        let description = format!("NOT {}", self.description());
        Self::try_from_fn(description, move |state| Ok(!self.test(state)?))
    }
}

impl<T> EdgeCondition<T> for Condition<T> {
    fn test(&self, state: &GraphWorkflowState<T>) -> Result<bool, WorkflowError> {
        self.inner.test(state)
    }

    fn description(&self) -> String {
        self.inner.description()
    }
}

/// Typed lookup that reports a value which no longer decodes.
fn lookup<T, V: ContextValue>(
    state: &GraphWorkflowState<T>,
    key: &ContextKey<V>,
) -> Result<Option<V>, WorkflowError> {
    match state.context().get_raw(key.erased()) {
        Some(raw) => Ok(Some(key.cast(raw)?)),
        None => Ok(None),
    }
}
