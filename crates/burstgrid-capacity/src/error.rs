//! Capacity control error types.

use burstgrid_state::{CapacityTarget, StateError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CapacityError {
    #[error("invalid capacity target {target} for pool {pool_id}: min_units exceeds max_units")]
    InvalidTarget {
        pool_id: String,
        target: CapacityTarget,
    },

    #[error("capacity backend error: {0}")]
    Backend(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type CapacityResult<T> = Result<T, CapacityError>;
