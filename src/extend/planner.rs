//! Splitting newly available capacity between two consumers.

use thiserror::Error;

use crate::error::ExtendError;
use crate::units::Capacity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("'{0}' is not a non-negative number of GiB")]
    InvalidInput(String),

    #[error("requested {requested} but only {available} is available")]
    Overdraft {
        requested: Capacity,
        available: Capacity,
    },
}

impl From<PlanError> for ExtendError {
    fn from(err: PlanError) -> Self {
        ExtendError::Input(err.to_string())
    }
}

/// A split of `total` into `first + second`, with `second` the exact remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationPlan {
    pub total: Capacity,
    pub first: Capacity,
    pub second: Capacity,
}

impl AllocationPlan {
    pub fn first_is_negligible(&self, threshold: Capacity) -> bool {
        self.first < threshold
    }

    pub fn second_is_negligible(&self, threshold: Capacity) -> bool {
        self.second < threshold
    }
}

pub fn plan(total: Capacity, requested_first: &str) -> Result<AllocationPlan, PlanError> {
    let first = Capacity::parse_gib(requested_first)
        .ok_or_else(|| PlanError::InvalidInput(requested_first.trim().to_string()))?;

    let second = total.checked_sub(first).ok_or(PlanError::Overdraft {
        requested: first,
        available: total,
    })?;

    Ok(AllocationPlan {
        total,
        first,
        second,
    })
}
