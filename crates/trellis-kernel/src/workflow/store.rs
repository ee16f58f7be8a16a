//! Suspension store contract
//!
//! Durable home for serialized suspensions. Backends are external; the
//! foundation crate ships an in-memory implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::id::WorkflowId;
use super::suspension::WorkflowSuspension;
use crate::error::WorkflowError;

/// A suspension ready to be persisted. The state travels as the serializer's
/// opaque `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspensionRecord {
    pub suspension_id: String,
    pub workflow_id: WorkflowId,
    pub workflow_version: String,
    pub reason: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    pub suspended_at: DateTime<Utc>,
    pub payload: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl SuspensionRecord {
    /// Describe `suspension` with an already serialized state.
    pub fn from_suspension<S>(
        suspension: &WorkflowSuspension<S>,
        workflow_id: WorkflowId,
        payload: String,
    ) -> Self {
        Self {
            suspension_id: suspension.suspension_id().to_string(),
            workflow_id,
            workflow_version: suspension.workflow_version().to_string(),
            reason: suspension.reason().to_string(),
            timeout_ms: suspension.timeout().map(|t| t.as_millis() as u64),
            suspended_at: suspension.suspended_at(),
            payload,
            metadata: suspension.metadata().clone(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Rebuild the suspension around a decoded state.
    pub fn into_suspension<S>(self, state: S) -> Result<WorkflowSuspension<S>, WorkflowError> {
        let mut builder = WorkflowSuspension::builder(self.suspension_id, state)
            .reason(self.reason)
            .workflow_version(self.workflow_version)
            .timeout(self.timeout_ms.map(Duration::from_millis))
            .suspended_at(self.suspended_at);
        for (key, value) in self.metadata {
            builder = builder.metadata(key, value);
        }
        builder.build()
    }
}

/// Suspension store trait
#[async_trait]
pub trait SuspensionStore: Send + Sync {
    /// Insert or replace the record under its suspension id.
    async fn save(&self, record: SuspensionRecord) -> Result<(), WorkflowError>;

    async fn load(&self, suspension_id: &str) -> Result<Option<SuspensionRecord>, WorkflowError>;

    /// Remove a record, returning it when it existed.
    async fn remove(&self, suspension_id: &str) -> Result<Option<SuspensionRecord>, WorkflowError>;

    /// Ids of every stored suspension.
    async fn list(&self) -> Result<Vec<String>, WorkflowError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrips_suspension_fields() {
        let suspension = WorkflowSuspension::builder("pay-1", ())
            .reason("waiting")
            .workflow_version("1.0.0")
            .timeout(Some(Duration::from_secs(60)))
            .metadata("channel", serde_json::json!("email"))
            .build()
            .unwrap();

        let record = SuspensionRecord::from_suspension(
            &suspension,
            WorkflowId::new("wf-1").unwrap(),
            "{}".to_string(),
        );
        assert_eq!(record.timeout(), Some(Duration::from_secs(60)));

        let rebuilt = record.into_suspension(()).unwrap();
        assert_eq!(rebuilt, suspension);
    }
}
