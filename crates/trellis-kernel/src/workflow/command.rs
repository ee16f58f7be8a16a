//! Command Protocol
//!
//! A node tells the engine what to do next by returning exactly one
//! [`GraphCommand`]. The set of commands is closed; the engine matches on it
//! exhaustively.
//!
//! Payload structs validate at construction, so a command that reached the
//! engine is always well formed.
//!
//! ```rust,ignore
//! // Continue to the next node with a context override
//! let cmd = Traverse::to(NodeId::new("review")?)
//!     .with_context_updates(ctx)
//!     .into();
//!
//! // Pause until someone approves
//! let cmd = Suspend::new("pay-1", "waiting for approval")?
//!     .with_timeout(Duration::from_secs(30 * 60))
//!     .into();
//!
//! // Fan out and meet again at "merge"
//! let cmd = GraphCommand::fork([b, c])?;
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::context::WorkflowContext;
use super::id::NodeId;
use crate::error::WorkflowError;

/// How forked branches are started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ForkStrategy {
    /// All branches start concurrently
    #[default]
    Parallel,
    /// Branches run one after another in declaration order
    Sequential,
}

/// When the join barrier releases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
    /// Wait until every branch reaches the join node
    #[default]
    WaitAll,
    /// Release on the first branch to arrive; the others are cancelled
    WaitAny,
}

/// Move to another node.
#[derive(Debug, Clone)]
pub struct Traverse<T> {
    target: NodeId,
    context_updates: Option<WorkflowContext>,
    data: Option<T>,
}

impl<T> Traverse<T> {
    pub fn to(target: NodeId) -> Self {
        Self {
            target,
            context_updates: None,
            data: None,
        }
    }

    pub fn with_context_updates(mut self, updates: WorkflowContext) -> Self {
        self.context_updates = Some(updates);
        self
    }

    /// Replace the payload as part of the move.
    pub fn with_data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }

    pub fn target(&self) -> &NodeId {
        &self.target
    }

    pub fn context_updates(&self) -> Option<&WorkflowContext> {
        self.context_updates.as_ref()
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn into_parts(self) -> (NodeId, Option<WorkflowContext>, Option<T>) {
        (self.target, self.context_updates, self.data)
    }
}

/// Finish the workflow with a result.
#[derive(Debug, Clone)]
pub struct Complete<T> {
    result: T,
    context_updates: Option<WorkflowContext>,
}

impl<T> Complete<T> {
    pub fn with_result(result: T) -> Self {
        Self {
            result,
            context_updates: None,
        }
    }

    pub fn with_context_updates(mut self, updates: WorkflowContext) -> Self {
        self.context_updates = Some(updates);
        self
    }

    pub fn result(&self) -> &T {
        &self.result
    }

    pub fn context_updates(&self) -> Option<&WorkflowContext> {
        self.context_updates.as_ref()
    }

    pub fn into_parts(self) -> (T, Option<WorkflowContext>) {
        (self.result, self.context_updates)
    }
}

/// Pause the workflow until a caller resumes it.
#[derive(Debug, Clone)]
pub struct Suspend {
    suspension_id: String,
    reason: String,
    timeout: Option<Duration>,
    context_updates: Option<WorkflowContext>,
}

impl Suspend {
    /// Both the id and the reason must be non-empty.
    pub fn new(
        suspension_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<Self, WorkflowError> {
        let suspension_id = suspension_id.into();
        let reason = reason.into();
        if suspension_id.is_empty() {
            return Err(WorkflowError::validation("suspension id must not be empty"));
        }
        if reason.is_empty() {
            return Err(WorkflowError::validation("suspension reason must not be empty"));
        }
        Ok(Self {
            suspension_id,
            reason,
            timeout: None,
            context_updates: None,
        })
    }

    /// Advisory timeout; the engine never cancels an expired suspension.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_context_updates(mut self, updates: WorkflowContext) -> Self {
        self.context_updates = Some(updates);
        self
    }

    pub fn suspension_id(&self) -> &str {
        &self.suspension_id
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn context_updates(&self) -> Option<&WorkflowContext> {
        self.context_updates.as_ref()
    }
}

/// Split execution into independent branches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fork {
    targets: Vec<NodeId>,
    strategy: ForkStrategy,
    timeout: Option<Duration>,
}

impl Fork {
    /// Targets are de-duplicated, keeping declaration order. An empty set is
    /// rejected.
    pub fn new(
        targets: impl IntoIterator<Item = NodeId>,
        strategy: ForkStrategy,
    ) -> Result<Self, WorkflowError> {
        let mut unique: Vec<NodeId> = Vec::new();
        for target in targets {
            if !unique.contains(&target) {
                unique.push(target);
            }
        }
        if unique.is_empty() {
            return Err(WorkflowError::validation("fork requires at least one target node"));
        }
        Ok(Self {
            targets: unique,
            strategy,
            timeout: None,
        })
    }

    /// Upper bound on how long the join barrier may wait.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    pub fn strategy(&self) -> ForkStrategy {
        self.strategy
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// End a forked branch at the join node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    join_node: NodeId,
    strategy: JoinStrategy,
    timeout: Option<Duration>,
}

impl Join {
    pub fn at(join_node: NodeId, strategy: JoinStrategy) -> Self {
        Self {
            join_node,
            strategy,
            timeout: None,
        }
    }

    /// Barrier timeout, measured from the start of the fork.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn join_node(&self) -> &NodeId {
        &self.join_node
    }

    pub fn strategy(&self) -> JoinStrategy {
        self.strategy
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Instruction a node returns to the engine.
#[derive(Debug, Clone)]
pub enum GraphCommand<T> {
    Traverse(Traverse<T>),
    Complete(Complete<T>),
    Suspend(Suspend),
    Fork(Fork),
    Join(Join),
}

/// Discriminant of a [`GraphCommand`], handy for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Traverse,
    Complete,
    Suspend,
    Fork,
    Join,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Traverse => "traverse",
            Self::Complete => "complete",
            Self::Suspend => "suspend",
            Self::Fork => "fork",
            Self::Join => "join",
        };
        f.write_str(name)
    }
}

impl<T> GraphCommand<T> {
    /// Traverse to `target` with no overrides.
    pub fn traverse(target: NodeId) -> Self {
        Self::Traverse(Traverse::to(target))
    }

    /// Complete with `result`.
    pub fn complete(result: T) -> Self {
        Self::Complete(Complete::with_result(result))
    }

    /// Suspend with no timeout.
    pub fn suspend(
        suspension_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<Self, WorkflowError> {
        Suspend::new(suspension_id, reason).map(Self::Suspend)
    }

    /// Parallel fork over `targets`.
    pub fn fork(targets: impl IntoIterator<Item = NodeId>) -> Result<Self, WorkflowError> {
        Fork::new(targets, ForkStrategy::Parallel).map(Self::Fork)
    }

    /// Wait-all join at `join_node`.
    pub fn join(join_node: NodeId) -> Self {
        Self::Join(Join::at(join_node, JoinStrategy::WaitAll))
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Traverse(_) => CommandKind::Traverse,
            Self::Complete(_) => CommandKind::Complete,
            Self::Suspend(_) => CommandKind::Suspend,
            Self::Fork(_) => CommandKind::Fork,
            Self::Join(_) => CommandKind::Join,
        }
    }

    /// Context overrides carried by the command, if its variant has any.
    pub fn context_updates(&self) -> Option<&WorkflowContext> {
        match self {
            Self::Traverse(t) => t.context_updates(),
            Self::Complete(c) => c.context_updates(),
            Self::Suspend(s) => s.context_updates(),
            Self::Fork(_) | Self::Join(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Suspend(_))
    }
}

impl<T> From<Traverse<T>> for GraphCommand<T> {
    fn from(cmd: Traverse<T>) -> Self {
        Self::Traverse(cmd)
    }
}

impl<T> From<Complete<T>> for GraphCommand<T> {
    fn from(cmd: Complete<T>) -> Self {
        Self::Complete(cmd)
    }
}

impl<T> From<Suspend> for GraphCommand<T> {
    fn from(cmd: Suspend) -> Self {
        Self::Suspend(cmd)
    }
}

impl<T> From<Fork> for GraphCommand<T> {
    fn from(cmd: Fork) -> Self {
        Self::Fork(cmd)
    }
}

impl<T> From<Join> for GraphCommand<T> {
    fn from(cmd: Join) -> Self {
        Self::Join(cmd)
    }
}
