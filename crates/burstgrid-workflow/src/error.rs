//! Workflow error types.

use std::time::Duration;

use thiserror::Error;

use burstgrid_capacity::CapacityError;
use burstgrid_executor::ExecutionError;
use burstgrid_state::{CapacityTarget, JobStatus, StateError};

/// Errors surfaced by the orchestrator, either to the trigger caller or as
/// the recorded cause of a failed job.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid capacity target {target} for pool {pool_id}")]
    InvalidTarget {
        pool_id: String,
        target: CapacityTarget,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("job {job_id} is already {status}")]
    Conflict { job_id: String, status: JobStatus },

    #[error("pool {pool_id} did not reach {target} within {waited:?}")]
    ReadinessTimeout {
        pool_id: String,
        target: CapacityTarget,
        waited: Duration,
    },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("execution exceeded {0:?}")]
    ExecutionTimeout(Duration),

    /// Idle release failed. Logged and recorded, never a job's verdict.
    #[error("idle scale-down of pool {pool_id} failed: {message}")]
    ScaleDown { pool_id: String, message: String },

    #[error("execution cancelled")]
    Cancelled,

    #[error("execution interrupted while processing; stages are not re-run")]
    Interrupted,

    #[error("no transition from {from} on {event}")]
    InvalidTransition {
        from: &'static str,
        event: &'static str,
    },

    #[error("capacity error: {0}")]
    Capacity(CapacityError),

    #[error("state store error: {0}")]
    State(StateError),
}

impl From<CapacityError> for WorkflowError {
    fn from(e: CapacityError) -> Self {
        match e {
            CapacityError::InvalidTarget { pool_id, target } => {
                WorkflowError::InvalidTarget { pool_id, target }
            }
            other => WorkflowError::Capacity(other),
        }
    }
}

impl From<StateError> for WorkflowError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(what) => WorkflowError::NotFound(what),
            StateError::Conflict { id, actual } => WorkflowError::Conflict {
                job_id: id,
                status: actual,
            },
            other => WorkflowError::State(other),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
