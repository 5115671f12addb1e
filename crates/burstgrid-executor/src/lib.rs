//! burstgrid-executor — runs a job once capacity is ready.
//!
//! The workload itself is opaque: a [`JobExecutor`] takes a job and either
//! returns a JSON result or a stage-level [`ExecutionError`]. Executors
//! never retry; a partially completed multi-stage job is not safe to run
//! again, so retry policy (if any) belongs to the caller.
//!
//! [`StagedExecutor`] runs a fixed sequence of [`Stage`]s. The daemon ships
//! a simulated media pipeline (`thumbnail → transcode → analyze →
//! subtitles`) whose stages only sleep, which is enough to drive the
//! orchestration end to end.

pub mod error;
pub mod stage;
pub mod staged;

use async_trait::async_trait;
use burstgrid_state::Job;

pub use error::ExecutionError;
pub use stage::{FAIL_STAGE_KEY, SimulatedStage, Stage};
pub use staged::StagedExecutor;

/// Runs a job's work against an already-provisioned pool.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run the job to completion. No retries, no partial results on failure.
    async fn execute(&self, job: &Job) -> Result<serde_json::Value, ExecutionError>;
}
