//! JSON state serializer
//!
//! States are wrapped in a small envelope recording the workflow version:
//!
//! ```json
//! { "version": "1.2.0", "state": { "workflow_id": "...", ... } }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use trellis_kernel::WorkflowError;
use trellis_kernel::workflow::{GraphWorkflowState, Payload, StateMigration, StateSerializer};

#[derive(Serialize)]
struct EnvelopeRef<'a, S> {
    version: &'a str,
    state: &'a S,
}

#[derive(Deserialize)]
struct Envelope {
    version: String,
    state: Value,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: String,
}

/// Whether a state recorded at `from` may be read by a workflow at `to`.
///
/// Identical strings are always compatible. Otherwise both must parse as
/// semver, `from <= to`, and they must share the major version (the minor
/// version too while major is 0).
pub fn semver_compatible(from: &str, to: &str) -> bool {
    if from == to {
        return true;
    }
    let (Ok(from), Ok(to)) = (semver::Version::parse(from), semver::Version::parse(to)) else {
        return false;
    };
    if from > to || from.major != to.major {
        return false;
    }
    from.major > 0 || from.minor == to.minor
}

/// [`StateSerializer`] over `serde_json` with a registry of migrations keyed
/// by `(from, to)` version pairs.
pub struct JsonStateSerializer<T> {
    migrations: HashMap<(String, String), Arc<dyn StateMigration>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonStateSerializer<T> {
    pub fn new() -> Self {
        Self {
            migrations: HashMap::new(),
            _marker: PhantomData,
        }
    }

    /// Register a migration from `from` to `to`.
    pub fn with_migration(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        migration: impl StateMigration + 'static,
    ) -> Self {
        self.migrations
            .insert((from.into(), to.into()), Arc::new(migration));
        self
    }
}

impl<T> Default for JsonStateSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonStateSerializer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pairs: Vec<String> = self
            .migrations
            .keys()
            .map(|(from, to)| format!("{from}->{to}"))
            .collect();
        pairs.sort();
        f.debug_struct("JsonStateSerializer")
            .field("migrations", &pairs)
            .finish()
    }
}

impl<T: Payload> StateSerializer<T> for JsonStateSerializer<T> {
    fn serialize(&self, state: &GraphWorkflowState<T>, version: &str) -> Result<String, WorkflowError> {
        Ok(serde_json::to_string(&EnvelopeRef { version, state })?)
    }

    fn deserialize(
        &self,
        payload: &str,
        expected_version: &str,
    ) -> Result<GraphWorkflowState<T>, WorkflowError> {
        let envelope: Envelope = serde_json::from_str(payload)?;
        if !self.is_compatible(&envelope.version, expected_version) {
            return Err(WorkflowError::version_mismatch(expected_version, envelope.version));
        }
        Ok(serde_json::from_value(envelope.state)?)
    }

    fn recorded_version(&self, payload: &str) -> Result<String, WorkflowError> {
        let probe: VersionProbe = serde_json::from_str(payload)?;
        Ok(probe.version)
    }

    fn is_compatible(&self, from_version: &str, to_version: &str) -> bool {
        semver_compatible(from_version, to_version)
    }

    fn migrate(&self, payload: &str, from_version: &str, to_version: &str) -> Option<String> {
        let migration = self
            .migrations
            .get(&(from_version.to_string(), to_version.to_string()))?;
        debug!(from = from_version, to = to_version, "applying registered state migration");
        migration.migrate(payload, from_version, to_version)
    }
}
