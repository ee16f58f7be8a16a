//! Resuming suspended workflows
//!
//! A suspended state comes back as a serialized payload (or a typed
//! [`StateSuspension`]). Resume reconstitutes it against the current graph,
//! checks version compatibility, merges caller context and hands the state
//! back to the dispatch loop.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};
use trellis_kernel::workflow::{
    GraphWorkflowState, Payload, StateMigration, StateSuspension, WorkflowContext,
    WorkflowExecution, WorkflowResult,
};
use trellis_kernel::{WorkflowError, WorkflowOutcome};

use super::engine::WorkflowEngine;
use super::merge::{ContextMergeStrategy, PreferIncoming};

/// Options controlling a single resume.
///
/// Unset flags fall back to the engine's [`EngineConfig`](crate::EngineConfig).
#[derive(Clone)]
pub struct ResumeOptions {
    context_updates: WorkflowContext,
    allow_version_mismatch: Option<bool>,
    validate: Option<bool>,
    merge_strategy: Arc<dyn ContextMergeStrategy>,
    migration: Option<Arc<dyn StateMigration>>,
}

impl Default for ResumeOptions {
    fn default() -> Self {
        Self {
            context_updates: WorkflowContext::empty(),
            allow_version_mismatch: None,
            validate: None,
            merge_strategy: Arc::new(PreferIncoming),
            migration: None,
        }
    }
}

impl fmt::Debug for ResumeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumeOptions")
            .field("context_updates", &self.context_updates)
            .field("allow_version_mismatch", &self.allow_version_mismatch)
            .field("validate", &self.validate)
            .field("merge_strategy", &self.merge_strategy.name())
            .field("has_migration", &self.migration.is_some())
            .finish()
    }
}

impl ResumeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context merged into the suspended context before dispatch resumes.
    pub fn with_context_updates(mut self, updates: WorkflowContext) -> Self {
        self.context_updates = updates;
        self
    }

    pub fn allow_version_mismatch(mut self, allow: bool) -> Self {
        self.allow_version_mismatch = Some(allow);
        self
    }

    /// Check that the resumed position still exists in the graph.
    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = Some(validate);
        self
    }

    pub fn with_merge_strategy(mut self, strategy: impl ContextMergeStrategy + 'static) -> Self {
        self.merge_strategy = Arc::new(strategy);
        self
    }

    /// Migration tried before the serializer's own registry when the recorded
    /// version is incompatible. The migrated payload must record a compatible
    /// version.
    pub fn with_migration(mut self, migration: impl StateMigration + 'static) -> Self {
        self.migration = Some(Arc::new(migration));
        self
    }

    pub fn context_updates(&self) -> &WorkflowContext {
        &self.context_updates
    }

    pub fn merge_strategy(&self) -> &dyn ContextMergeStrategy {
        self.merge_strategy.as_ref()
    }
}

impl<T: Payload> WorkflowEngine<T> {
    /// Resume from a serialized payload produced by this engine's serializer.
    pub async fn resume(&self, payload: &str, options: ResumeOptions) -> WorkflowOutcome<T> {
        self.resume_detailed(payload, options).await.into_result()
    }

    pub async fn resume_detailed(
        &self,
        payload: &str,
        options: ResumeOptions,
    ) -> WorkflowExecution<T> {
        match self.reconstitute(payload, &options) {
            Ok(state) => self.run_detailed(state).await,
            Err(error) => {
                warn!(error = %error, "resume rejected");
                WorkflowExecution::Failed { error, state: None }
            }
        }
    }

    /// Resume a suspension returned by an earlier run.
    pub async fn resume_suspension(
        &self,
        suspension: StateSuspension<T>,
        options: ResumeOptions,
    ) -> WorkflowOutcome<T> {
        let payload = match self
            .serializer
            .serialize(suspension.suspended_state(), suspension.workflow_version())
        {
            Ok(payload) => payload,
            Err(error) => return WorkflowResult::failure(error),
        };
        info!(suspension_id = suspension.suspension_id(), "resuming suspension");
        self.resume(&payload, options).await
    }

    /// Resume a suspension persisted in the configured store.
    ///
    /// The record is removed once the state has been reconstituted, so a
    /// suspension resumes at most once.
    pub async fn resume_from_store(
        &self,
        suspension_id: &str,
        options: ResumeOptions,
    ) -> WorkflowOutcome<T> {
        self.resume_from_store_detailed(suspension_id, options)
            .await
            .into_result()
    }

    pub async fn resume_from_store_detailed(
        &self,
        suspension_id: &str,
        options: ResumeOptions,
    ) -> WorkflowExecution<T> {
        let failed = |error: WorkflowError| WorkflowExecution::Failed { error, state: None };

        let Some(store) = &self.store else {
            return failed(WorkflowError::validation("no suspension store configured"));
        };
        let record = match store.load(suspension_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                return failed(WorkflowError::validation(format!(
                    "unknown suspension '{suspension_id}'"
                )));
            }
            Err(error) => return failed(error),
        };
        if record.workflow_version != self.workflow.version() {
            info!(
                suspension_id,
                recorded = %record.workflow_version,
                current = %self.workflow.version(),
                "resuming suspension recorded under another workflow version"
            );
        }

        let state = match self.reconstitute(&record.payload, &options) {
            Ok(state) => state,
            Err(error) => {
                warn!(suspension_id, error = %error, "resume rejected");
                return failed(error);
            }
        };
        if let Err(error) = store.remove(suspension_id).await {
            return WorkflowExecution::Failed {
                error,
                state: Some(state),
            };
        }

        info!(suspension_id, workflow_id = %record.workflow_id, "resuming stored suspension");
        self.run_detailed(state).await
    }

    /// Turn a payload back into a runnable state without running it.
    pub fn reconstitute(
        &self,
        payload: &str,
        options: &ResumeOptions,
    ) -> Result<GraphWorkflowState<T>, WorkflowError> {
        let current = self.workflow.version();
        let recorded = self.serializer.recorded_version(payload)?;
        let allow_mismatch = options
            .allow_version_mismatch
            .unwrap_or(self.config.allow_version_mismatch);

        let state = if self.serializer.is_compatible(&recorded, current) {
            self.serializer.deserialize(payload, current)?
        } else if allow_mismatch {
            warn!(
                recorded = %recorded,
                current = %current,
                "resuming across incompatible workflow versions"
            );
            self.serializer.deserialize(payload, &recorded)?
        } else {
            let migrated = options
                .migration
                .as_ref()
                .and_then(|migration| migration.migrate(payload, &recorded, current))
                .or_else(|| self.serializer.migrate(payload, &recorded, current));
            let Some(migrated) = migrated else {
                return Err(WorkflowError::version_mismatch(current, recorded));
            };
            info!(from = %recorded, to = %current, "migrated suspended state");
            self.serializer.deserialize(&migrated, current)?
        };

        if options.validate.unwrap_or(self.config.validate_on_resume) {
            self.check_position(&state)?;
        }

        if options.context_updates.is_empty() {
            return Ok(state);
        }
        let merged = options
            .merge_strategy
            .merge(state.context(), &options.context_updates)?;
        Ok(state.with_context(merged))
    }

    fn check_position(&self, state: &GraphWorkflowState<T>) -> Result<(), WorkflowError> {
        match state.current_node() {
            Some(node) if self.workflow.contains_node(node) => Ok(()),
            Some(node) => Err(WorkflowError::validation(format!(
                "resumed state points at node '{node}' which is not part of workflow '{}' {}",
                self.workflow.name(),
                self.workflow.version()
            ))),
            None => Err(WorkflowError::validation(
                "resumed state is not positioned at any node",
            )),
        }
    }
}
