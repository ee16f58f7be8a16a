//! In-memory suspension store
//!
//! Thread-safe and process-local, suitable for tests, embedded use and
//! short-lived workers that do not need suspensions to survive a restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use trellis_kernel::WorkflowError;
use trellis_kernel::workflow::{SuspensionRecord, SuspensionStore};

/// [`SuspensionStore`] backed by a `HashMap`.
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct InMemorySuspensionStore {
    records: Arc<RwLock<HashMap<String, SuspensionRecord>>>,
}

impl InMemorySuspensionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl SuspensionStore for InMemorySuspensionStore {
    async fn save(&self, record: SuspensionRecord) -> Result<(), WorkflowError> {
        let mut records = self.records.write().await;
        records.insert(record.suspension_id.clone(), record);
        Ok(())
    }

    async fn load(&self, suspension_id: &str) -> Result<Option<SuspensionRecord>, WorkflowError> {
        Ok(self.records.read().await.get(suspension_id).cloned())
    }

    async fn remove(&self, suspension_id: &str) -> Result<Option<SuspensionRecord>, WorkflowError> {
        Ok(self.records.write().await.remove(suspension_id))
    }

    async fn list(&self) -> Result<Vec<String>, WorkflowError> {
        let mut ids: Vec<String> = self.records.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
