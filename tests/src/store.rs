use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use trellis_foundation::workflow::InMemorySuspensionStore;
use trellis_kernel::WorkflowError;
use trellis_kernel::workflow::{SuspensionRecord, SuspensionStore};

/// A store operation, as seen by [`RecordingStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Save(String),
    Load(String),
    Remove(String),
    List,
}

/// In-memory store that records every call and can fail saves on demand.
#[derive(Debug, Clone, Default)]
pub struct RecordingStore {
    inner: InMemorySuspensionStore,
    calls: Arc<RwLock<Vec<StoreCall>>>,
    fail_saves: Arc<AtomicBool>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent saves return a storage error.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub async fn calls(&self) -> Vec<StoreCall> {
        self.calls.read().await.clone()
    }

    pub fn inner(&self) -> &InMemorySuspensionStore {
        &self.inner
    }

    async fn record(&self, call: StoreCall) {
        self.calls.write().await.push(call);
    }
}

#[async_trait]
impl SuspensionStore for RecordingStore {
    async fn save(&self, record: SuspensionRecord) -> Result<(), WorkflowError> {
        self.record(StoreCall::Save(record.suspension_id.clone())).await;
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(WorkflowError::Storage("injected save failure".to_string()));
        }
        self.inner.save(record).await
    }

    async fn load(&self, suspension_id: &str) -> Result<Option<SuspensionRecord>, WorkflowError> {
        self.record(StoreCall::Load(suspension_id.to_string())).await;
        self.inner.load(suspension_id).await
    }

    async fn remove(&self, suspension_id: &str) -> Result<Option<SuspensionRecord>, WorkflowError> {
        self.record(StoreCall::Remove(suspension_id.to_string())).await;
        self.inner.remove(suspension_id).await
    }

    async fn list(&self) -> Result<Vec<String>, WorkflowError> {
        self.record(StoreCall::List).await;
        self.inner.list().await
    }
}
