//! Workflow suspension
//!
//! A [`WorkflowSuspension`] is the durable record of a paused workflow: the
//! suspended state plus everything needed to decide how and whether to
//! resume it. Expiry is advisory; nothing cancels an expired suspension.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::state::GraphWorkflowState;
use crate::error::WorkflowError;

/// Suspension of a graph workflow state.
pub type StateSuspension<T> = WorkflowSuspension<GraphWorkflowState<T>>;

/// A paused workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSuspension<S> {
    suspension_id: String,
    suspended_state: S,
    reason: String,
    #[serde(default, with = "duration_millis")]
    timeout: Option<Duration>,
    suspended_at: DateTime<Utc>,
    workflow_version: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, Value>,
}

impl<S> WorkflowSuspension<S> {
    pub fn builder(suspension_id: impl Into<String>, suspended_state: S) -> SuspensionBuilder<S> {
        SuspensionBuilder {
            suspension_id: suspension_id.into(),
            suspended_state,
            reason: None,
            timeout: None,
            suspended_at: None,
            workflow_version: None,
            metadata: HashMap::new(),
        }
    }

    pub fn suspension_id(&self) -> &str {
        &self.suspension_id
    }

    pub fn suspended_state(&self) -> &S {
        &self.suspended_state
    }

    pub fn into_state(self) -> S {
        self.suspended_state
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn suspended_at(&self) -> DateTime<Utc> {
        self.suspended_at
    }

    /// Version of the workflow definition active when this was captured.
    pub fn workflow_version(&self) -> &str {
        &self.workflow_version
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    /// `suspended_at + timeout`, when a timeout is set.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let timeout = chrono::Duration::from_std(self.timeout?).ok()?;
        self.suspended_at.checked_add_signed(timeout)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|deadline| deadline < now)
    }

    pub fn remaining_time(&self) -> Option<Duration> {
        self.remaining_time_at(Utc::now())
    }

    /// Time left before expiry, floored at zero. `None` without a timeout.
    pub fn remaining_time_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let timeout = self.timeout?;
        let elapsed = (now - self.suspended_at).to_std().unwrap_or(Duration::ZERO);
        Some(timeout.saturating_sub(elapsed))
    }

    /// Replace the suspended state, keeping every other field.
    pub fn map_state<U, F>(self, f: F) -> WorkflowSuspension<U>
    where
        F: FnOnce(S) -> U,
    {
        WorkflowSuspension {
            suspension_id: self.suspension_id,
            suspended_state: f(self.suspended_state),
            reason: self.reason,
            timeout: self.timeout,
            suspended_at: self.suspended_at,
            workflow_version: self.workflow_version,
            metadata: self.metadata,
        }
    }
}

/// Builder for [`WorkflowSuspension`]. Reason and workflow version are
/// required; `build` fails without them.
#[derive(Debug)]
pub struct SuspensionBuilder<S> {
    suspension_id: String,
    suspended_state: S,
    reason: Option<String>,
    timeout: Option<Duration>,
    suspended_at: Option<DateTime<Utc>>,
    workflow_version: Option<String>,
    metadata: HashMap<String, Value>,
}

impl<S> SuspensionBuilder<S> {
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the capture time (defaults to now).
    pub fn suspended_at(mut self, at: DateTime<Utc>) -> Self {
        self.suspended_at = Some(at);
        self
    }

    pub fn workflow_version(mut self, version: impl Into<String>) -> Self {
        self.workflow_version = Some(version.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Result<WorkflowSuspension<S>, WorkflowError> {
        if self.suspension_id.is_empty() {
            return Err(WorkflowError::validation("suspension id must not be empty"));
        }
        let reason = self
            .reason
            .filter(|r| !r.is_empty())
            .ok_or_else(|| WorkflowError::validation("suspension reason is required"))?;
        let workflow_version = self
            .workflow_version
            .filter(|v| !v.is_empty())
            .ok_or_else(|| WorkflowError::validation("suspension workflow version is required"))?;

        Ok(WorkflowSuspension {
            suspension_id: self.suspension_id,
            suspended_state: self.suspended_state,
            reason,
            timeout: self.timeout,
            suspended_at: self.suspended_at.unwrap_or_else(Utc::now),
            workflow_version,
            metadata: self.metadata,
        })
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        value.map(|d| d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
