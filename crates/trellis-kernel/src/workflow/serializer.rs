//! Serialization contract
//!
//! The engine never picks a wire format. It hands states to a
//! [`StateSerializer`] and receives them back; storage of the resulting
//! string is the caller's business.

use super::state::GraphWorkflowState;
use crate::error::WorkflowError;

/// Rewrites a serialized state from one workflow version to another.
///
/// Returns `None` when no migration path exists.
pub trait StateMigration: Send + Sync {
    fn migrate(&self, payload: &str, from_version: &str, to_version: &str) -> Option<String>;
}

impl<F> StateMigration for F
where
    F: Fn(&str, &str, &str) -> Option<String> + Send + Sync,
{
    fn migrate(&self, payload: &str, from_version: &str, to_version: &str) -> Option<String> {
        self(payload, from_version, to_version)
    }
}

/// State serializer contract
pub trait StateSerializer<T>: Send + Sync {
    /// Encode `state`, tagging it with the workflow `version`.
    fn serialize(&self, state: &GraphWorkflowState<T>, version: &str) -> Result<String, WorkflowError>;

    /// Decode a payload produced by [`serialize`](Self::serialize).
    ///
    /// Fails with `VersionMismatch` when the recorded version is not
    /// compatible with `expected_version`.
    fn deserialize(
        &self,
        payload: &str,
        expected_version: &str,
    ) -> Result<GraphWorkflowState<T>, WorkflowError>;

    /// Read the version a payload was recorded with.
    fn recorded_version(&self, payload: &str) -> Result<String, WorkflowError>;

    /// Whether a state recorded at `from_version` can be read as `to_version`.
    fn is_compatible(&self, from_version: &str, to_version: &str) -> bool;

    /// Optional built-in migration path.
    fn migrate(&self, _payload: &str, _from_version: &str, _to_version: &str) -> Option<String> {
        None
    }
}
