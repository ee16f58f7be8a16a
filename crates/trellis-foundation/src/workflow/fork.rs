//! Fork/join barrier
//!
//! Every branch starts from its own copy of the pre-fork state and runs its
//! own dispatch loop until it returns a `Join`. Branch results are merged in
//! fork declaration order, whatever order they finished in.

use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{Instrument, debug, info, info_span, warn};
use trellis_kernel::WorkflowError;
use trellis_kernel::workflow::{
    Fork, ForkStrategy, GraphWorkflowState, Join, JoinStrategy, Payload, WorkflowContext,
};

use super::budget::StepBudget;
use super::engine::{Flow, Lane, WorkflowEngine};

/// A branch that reached its join node.
struct Arrival<T> {
    index: usize,
    join: Join,
    state: GraphWorkflowState<T>,
}

/// Barrier bookkeeping shared by both fork strategies.
struct Barrier {
    started: Instant,
    deadline: Option<Instant>,
    strategy: Option<JoinStrategy>,
}

impl Barrier {
    fn new(started: Instant, deadline: Option<Instant>) -> Self {
        Self {
            started,
            deadline,
            strategy: None,
        }
    }

    /// Record an arrival; returns true once the barrier is satisfied early.
    fn arrive<T>(&mut self, arrival: &Arrival<T>) -> bool {
        if let Some(timeout) = arrival.join.timeout() {
            self.deadline = earliest(self.deadline, Some(self.started + timeout));
        }
        let strategy = *self.strategy.get_or_insert(arrival.join.strategy());
        strategy == JoinStrategy::WaitAny
    }

    fn timed_out(&self) -> WorkflowError {
        let waited = self
            .deadline
            .map(|deadline| deadline.saturating_duration_since(self.started))
            .unwrap_or_default();
        WorkflowError::timeout("fork join", waited.as_millis() as u64)
    }
}

fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn into_arrival<T>(index: usize, flow: Flow<T>) -> Result<Arrival<T>, WorkflowError> {
    match flow {
        Flow::Joined { join, state } => Ok(Arrival { index, join, state }),
        Flow::Failed { error, .. } => Err(error),
        Flow::Completed { .. } | Flow::Suspended(_) => Err(WorkflowError::engine(format!(
            "fork branch {index} ended without reaching a join"
        ))),
    }
}

impl<T: Payload> WorkflowEngine<T> {
    /// Run a fork from `state` and return the merged state positioned at the
    /// join node.
    pub(crate) async fn run_fork(
        &self,
        state: &GraphWorkflowState<T>,
        fork: Fork,
        budget: &StepBudget,
    ) -> Result<GraphWorkflowState<T>, WorkflowError> {
        let Some(origin) = state.current_node().cloned() else {
            return Err(WorkflowError::validation("fork from an unpositioned state"));
        };
        if let Some(missing) = fork
            .targets()
            .iter()
            .find(|target| !self.workflow.contains_node(target))
        {
            return Err(WorkflowError::validation(format!(
                "fork target '{missing}' does not exist"
            )));
        }

        let started = Instant::now();
        let deadline = earliest(
            fork.timeout().map(|timeout| started + timeout),
            self.config.join_timeout().map(|timeout| started + timeout),
        );
        let barrier = Barrier::new(started, deadline);

        info!(
            node_id = %origin,
            branches = fork.targets().len(),
            strategy = ?fork.strategy(),
            "fork started"
        );

        let branches: Vec<_> = fork
            .targets()
            .iter()
            .map(|target| self.step_to(state, &origin, target.clone()))
            .collect();

        let arrivals = match fork.strategy() {
            ForkStrategy::Parallel => self.join_parallel(branches, budget, barrier).await,
            ForkStrategy::Sequential => self.join_sequential(branches, budget, barrier).await,
        };
        let arrivals = arrivals.inspect_err(|error| {
            warn!(node_id = %origin, error = %error, "fork failed");
        })?;

        self.merge_branches(state, arrivals)
    }

    async fn join_parallel(
        &self,
        branches: Vec<GraphWorkflowState<T>>,
        budget: &StepBudget,
        mut barrier: Barrier,
    ) -> Result<Vec<Arrival<T>>, WorkflowError> {
        let mut set = JoinSet::new();
        for (index, branch) in branches.into_iter().enumerate() {
            let engine = self.clone();
            let budget = budget.clone();
            let span = info_span!("fork.branch", index, node_id = ?branch.current_node());
            set.spawn(
                async move {
                    let flow = engine.drive(branch, &budget, Lane::Branch).await;
                    (index, flow)
                }
                .instrument(span),
            );
        }

        let mut arrivals = Vec::with_capacity(set.len());
        loop {
            let next = match barrier.deadline {
                Some(deadline) => match timeout_at(deadline, set.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        set.abort_all();
                        return Err(barrier.timed_out());
                    }
                },
                None => set.join_next().await,
            };
            let Some(joined) = next else {
                break;
            };

            let arrival = match joined {
                Ok((index, flow)) => into_arrival(index, flow),
                Err(e) => Err(WorkflowError::engine(format!("fork branch task failed: {e}"))),
            };
            let arrival = match arrival {
                Ok(arrival) => arrival,
                Err(error) => {
                    set.abort_all();
                    return Err(error);
                }
            };

            debug!(branch = arrival.index, join_node = %arrival.join.join_node(), "branch joined");
            let done = barrier.arrive(&arrival);
            arrivals.push(arrival);
            if done {
                set.abort_all();
                break;
            }
        }

        arrivals.sort_by_key(|arrival| arrival.index);
        Ok(arrivals)
    }

    async fn join_sequential(
        &self,
        branches: Vec<GraphWorkflowState<T>>,
        budget: &StepBudget,
        mut barrier: Barrier,
    ) -> Result<Vec<Arrival<T>>, WorkflowError> {
        let mut arrivals = Vec::with_capacity(branches.len());
        for (index, branch) in branches.into_iter().enumerate() {
            let span = info_span!("fork.branch", index, node_id = ?branch.current_node());
            let drive = self.drive(branch, budget, Lane::Branch).instrument(span);
            let flow = match barrier.deadline {
                Some(deadline) => timeout_at(deadline, drive)
                    .await
                    .map_err(|_| barrier.timed_out())?,
                None => drive.await,
            };

            let arrival = into_arrival(index, flow)?;
            debug!(branch = index, join_node = %arrival.join.join_node(), "branch joined");
            let done = barrier.arrive(&arrival);
            arrivals.push(arrival);
            if done {
                break;
            }
        }
        Ok(arrivals)
    }

    /// Fold branch results onto the pre-fork state.
    ///
    /// Each branch contributes only the context keys it added or changed;
    /// on collisions the later branch in declaration order wins. The payload
    /// is taken from the last branch that changed it.
    fn merge_branches(
        &self,
        pre: &GraphWorkflowState<T>,
        arrivals: Vec<Arrival<T>>,
    ) -> Result<GraphWorkflowState<T>, WorkflowError> {
        let Some(first) = arrivals.first() else {
            return Err(WorkflowError::engine("fork produced no branch results"));
        };
        let join_node = first.join.join_node().clone();
        if let Some(other) = arrivals
            .iter()
            .find(|arrival| arrival.join.join_node() != &join_node)
        {
            return Err(WorkflowError::validation(format!(
                "fork branches joined at different nodes: '{join_node}' and '{}'",
                other.join.join_node()
            )));
        }
        if !self.workflow.contains_node(&join_node) {
            return Err(WorkflowError::validation(format!(
                "join node '{join_node}' does not exist"
            )));
        }

        let baseline = pre.data().map(serde_json::to_value).transpose()?;
        let mut context = pre.context().clone();
        let mut data = pre.data().cloned();
        for arrival in &arrivals {
            let delta = WorkflowContext::from_entries(
                arrival
                    .state
                    .context()
                    .iter()
                    .filter(|(key, value)| pre.context().get_raw(key) != Some(*value))
                    .map(|(key, value)| (key.clone(), value.clone())),
            )?;
            context = context.merge(&delta);

            let payload = arrival.state.data().map(serde_json::to_value).transpose()?;
            if payload != baseline {
                data = arrival.state.data().cloned();
            }
        }

        info!(
            join_node = %join_node,
            branches = arrivals.len(),
            "fork joined"
        );
        Ok(pre.with_data_and_context(data, context).move_to_node(join_node))
    }
}
