//! Step budget shared by a run and all of its fork branches.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use trellis_kernel::WorkflowError;

#[derive(Debug, Clone)]
pub(crate) struct StepBudget {
    remaining: Arc<AtomicU32>,
    max: u32,
}

impl StepBudget {
    pub(crate) fn new(max: u32) -> Self {
        Self {
            remaining: Arc::new(AtomicU32::new(max)),
            max,
        }
    }

    /// Take one step, failing once the budget is exhausted.
    pub(crate) fn consume(&self) -> Result<(), WorkflowError> {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| WorkflowError::StepLimitExceeded { limit: self.max })
    }

    pub(crate) fn used(&self) -> u32 {
        self.max - self.remaining.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_is_shared_between_clones() {
        let budget = StepBudget::new(2);
        let branch = budget.clone();

        assert!(budget.consume().is_ok());
        assert!(branch.consume().is_ok());
        assert!(matches!(
            budget.consume(),
            Err(WorkflowError::StepLimitExceeded { limit: 2 })
        ));
        assert_eq!(branch.used(), 2);
    }
}
