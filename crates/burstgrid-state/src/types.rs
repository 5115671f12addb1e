//! Domain types for the BurstGrid state store.
//!
//! These types represent the persisted state of jobs, pool capacity, and
//! workflow executions. All types are serializable to/from JSON for
//! storage in redb tables.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Unique identifier for a job.
pub type JobId = String;

/// Opaque identifier for a compute pool.
pub type PoolId = String;

/// Unique identifier for one workflow run of a job.
pub type ExecutionId = String;

// ── Capacity ───────────────────────────────────────────────────────

/// Concurrency envelope for a compute pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapacityTarget {
    pub min_units: u32,
    pub max_units: u32,
}

impl CapacityTarget {
    /// The intentionally-idle target `{0,0}`.
    pub const IDLE: CapacityTarget = CapacityTarget {
        min_units: 0,
        max_units: 0,
    };

    pub const fn new(min_units: u32, max_units: u32) -> Self {
        Self {
            min_units,
            max_units,
        }
    }

    /// `min_units <= max_units`.
    pub fn is_valid(&self) -> bool {
        self.min_units <= self.max_units
    }

    /// Both bounds strictly positive. Idle pools are never ready.
    pub fn is_ready(&self) -> bool {
        self.min_units > 0 && self.max_units > 0
    }

    pub fn is_idle(&self) -> bool {
        *self == Self::IDLE
    }
}

impl fmt::Display for CapacityTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{},{}}}", self.min_units, self.max_units)
    }
}

/// Requested and applied capacity for a single pool, as kept by the
/// capacity platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolCapacity {
    pub pool_id: PoolId,
    /// Last target accepted from a caller.
    pub requested: CapacityTarget,
    /// Last target the platform confirmed live.
    pub applied: CapacityTarget,
    /// Unix timestamp (milliseconds) of the last accepted change to `requested`.
    pub requested_at_ms: u64,
    /// Unix timestamp (milliseconds) of the last change to `applied`.
    pub applied_at_ms: u64,
}

impl PoolCapacity {
    /// A pool nothing has ever been requested for.
    pub fn idle(pool_id: &str) -> Self {
        Self {
            pool_id: pool_id.to_string(),
            requested: CapacityTarget::IDLE,
            applied: CapacityTarget::IDLE,
            requested_at_ms: 0,
            applied_at_ms: 0,
        }
    }

    /// Whether the platform still owes this pool a provisioning step.
    pub fn is_converged(&self) -> bool {
        self.requested == self.applied
    }
}

// ── Job ───────────────────────────────────────────────────────────

/// Lifecycle status of a job.
///
/// The only reachable path is
/// `submitted → scaling_up → processing → {completed | failed}`, with
/// `scaling_up → failed` when capacity never became ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    ScalingUp,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Submitted,
        JobStatus::ScalingUp,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::ScalingUp => "scaling_up",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// An execution currently owns this job.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::ScalingUp | JobStatus::Processing)
    }

    /// Whether `self → next` is an edge of the job lifecycle.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Submitted, JobStatus::ScalingUp)
                | (JobStatus::ScalingUp, JobStatus::Processing)
                | (JobStatus::ScalingUp, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A batch job that needs pool capacity to run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub pool_id: PoolId,
    pub status: JobStatus,
    /// Opaque submission payload handed to the executor.
    #[serde(default)]
    pub input: serde_json::Value,
    /// The execution that owns (or owned) this job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<ExecutionId>,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// A freshly submitted job.
    pub fn new(id: &str, pool_id: &str, input: serde_json::Value) -> Self {
        let now = epoch_secs();
        Self {
            id: id.to_string(),
            pool_id: pool_id.to_string(),
            status: JobStatus::Submitted,
            input,
            execution_id: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
            result: None,
            error: None,
        }
    }
}

/// Partial-field update for a job. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub execution_id: Option<ExecutionId>,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub failed_at: Option<u64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Merge into `job`, stamping `updated_at`.
    pub fn apply(self, job: &mut Job, now: u64) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(execution_id) = self.execution_id {
            job.execution_id = Some(execution_id);
        }
        if let Some(ts) = self.started_at {
            job.started_at = Some(ts);
        }
        if let Some(ts) = self.completed_at {
            job.completed_at = Some(ts);
        }
        if let Some(ts) = self.failed_at {
            job.failed_at = Some(ts);
        }
        if let Some(result) = self.result {
            job.result = Some(result);
        }
        if let Some(error) = self.error {
            job.error = Some(error);
        }
        job.updated_at = now;
    }
}

// ── Execution ─────────────────────────────────────────────────────

/// Checkpointed position of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Submitted,
    ScalingUp,
    Executing,
    ScalingDown,
    CompensatingScaleDown,
    Succeeded,
    Failed,
}

impl ExecutionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionPhase::Succeeded | ExecutionPhase::Failed)
    }
}

/// Durable record of one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub job_id: JobId,
    pub pool_id: PoolId,
    pub phase: ExecutionPhase,
    pub started_at: u64,
    pub updated_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<u64>,
    /// Primary failure cause, if the execution failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Idle-release failure. Never the verdict; kept for operators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_down_error: Option<String>,
}

impl ExecutionRecord {
    pub fn new(id: &str, job_id: &str, pool_id: &str) -> Self {
        let now = epoch_secs();
        Self {
            id: id.to_string(),
            job_id: job_id.to_string(),
            pool_id: pool_id.to_string(),
            phase: ExecutionPhase::Submitted,
            started_at: now,
            updated_at: now,
            finished_at: None,
            error: None,
            scale_down_error: None,
        }
    }
}

pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
