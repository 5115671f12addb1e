//! Workflow state machine.
//!
//! The transition graph is the single `match` in [`WorkflowState::on`].
//! The result waits in `ScalingDown` until the pool is released and the
//! failure cause waits in `CompensatingScaleDown`.

use serde_json::Value;

use burstgrid_state::{ExecutionPhase, JobStatus};

use crate::error::WorkflowError;

/// Where an execution is.
#[derive(Debug)]
pub enum WorkflowState {
    Submitted,
    ScalingUp,
    Executing,
    ScalingDown { result: Value },
    CompensatingScaleDown { cause: WorkflowError },
    Succeeded { result: Value },
    Failed { cause: WorkflowError },
}

/// What just happened to an execution.
#[derive(Debug)]
pub enum WorkflowEvent {
    /// The high target was requested for the job's pool.
    ScaleUpRequested,
    /// The applied target matched the high target.
    ReadinessConfirmed,
    /// One poll round ended without readiness; the workflow deadline has not.
    ReadinessTimedOut,
    /// A fatal condition before or during execution (deadline, cancel,
    /// backend error, execution timeout).
    Aborted(WorkflowError),
    ExecutionSucceeded(Value),
    ExecutionFailed(WorkflowError),
    /// The idle release was issued (whether or not it succeeded).
    CapacityReleased,
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::ScaleUpRequested => "scale_up_requested",
            WorkflowEvent::ReadinessConfirmed => "readiness_confirmed",
            WorkflowEvent::ReadinessTimedOut => "readiness_timed_out",
            WorkflowEvent::Aborted(_) => "aborted",
            WorkflowEvent::ExecutionSucceeded(_) => "execution_succeeded",
            WorkflowEvent::ExecutionFailed(_) => "execution_failed",
            WorkflowEvent::CapacityReleased => "capacity_released",
        }
    }
}

impl WorkflowState {
    /// Apply `event`, returning the next state.
    pub fn on(self, event: WorkflowEvent) -> Result<WorkflowState, WorkflowError> {
        use WorkflowEvent as E;
        use WorkflowState as S;

        match (self, event) {
            (S::Submitted, E::ScaleUpRequested) => Ok(S::ScalingUp),

            (S::ScalingUp, E::ReadinessConfirmed) => Ok(S::Executing),
            (S::ScalingUp, E::ReadinessTimedOut) => Ok(S::ScalingUp),
            (S::ScalingUp, E::Aborted(cause)) => Ok(S::CompensatingScaleDown { cause }),

            (S::Executing, E::ExecutionSucceeded(result)) => Ok(S::ScalingDown { result }),
            (S::Executing, E::ExecutionFailed(cause)) | (S::Executing, E::Aborted(cause)) => {
                Ok(S::CompensatingScaleDown { cause })
            }

            (S::ScalingDown { result }, E::CapacityReleased) => Ok(S::Succeeded { result }),
            (S::CompensatingScaleDown { cause }, E::CapacityReleased) => Ok(S::Failed { cause }),

            (state, event) => Err(WorkflowError::InvalidTransition {
                from: state.name(),
                event: event.name(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::Submitted => "submitted",
            WorkflowState::ScalingUp => "scaling_up",
            WorkflowState::Executing => "executing",
            WorkflowState::ScalingDown { .. } => "scaling_down",
            WorkflowState::CompensatingScaleDown { .. } => "compensating_scale_down",
            WorkflowState::Succeeded { .. } => "succeeded",
            WorkflowState::Failed { .. } => "failed",
        }
    }

    /// Checkpoint label for the execution record.
    pub fn phase(&self) -> ExecutionPhase {
        match self {
            WorkflowState::Submitted => ExecutionPhase::Submitted,
            WorkflowState::ScalingUp => ExecutionPhase::ScalingUp,
            WorkflowState::Executing => ExecutionPhase::Executing,
            WorkflowState::ScalingDown { .. } => ExecutionPhase::ScalingDown,
            WorkflowState::CompensatingScaleDown { .. } => ExecutionPhase::CompensatingScaleDown,
            WorkflowState::Succeeded { .. } => ExecutionPhase::Succeeded,
            WorkflowState::Failed { .. } => ExecutionPhase::Failed,
        }
    }

    /// Job status written on entering this state, if entering it changes
    /// the job's status. Release states keep the job where it was.
    pub fn job_status(&self) -> Option<JobStatus> {
        match self {
            WorkflowState::Submitted => Some(JobStatus::Submitted),
            WorkflowState::ScalingUp => Some(JobStatus::ScalingUp),
            WorkflowState::Executing => Some(JobStatus::Processing),
            WorkflowState::ScalingDown { .. } | WorkflowState::CompensatingScaleDown { .. } => None,
            WorkflowState::Succeeded { .. } => Some(JobStatus::Completed),
            WorkflowState::Failed { .. } => Some(JobStatus::Failed),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Succeeded { .. } | WorkflowState::Failed { .. })
    }

    /// Whether this state releases capacity on exit.
    pub fn is_release(&self) -> bool {
        matches!(
            self,
            WorkflowState::ScalingDown { .. } | WorkflowState::CompensatingScaleDown { .. }
        )
    }
}
