//! burstgrid-workflow — the elastic-capacity control loop.
//!
//! One execution per job drives a fixed state machine:
//!
//! ```text
//! Submitted ──► ScalingUp ──► Executing ──► ScalingDown ──────────► Succeeded
//!                  │  ▲            │
//!                  └──┘ re-poll    │ failure / cancel / timeout
//!                  │               ▼
//!                  └──────► CompensatingScaleDown ──────────────► Failed
//! ```
//!
//! Capacity is requested in exactly two shapes: the configured high
//! target on the way up and `{0,0}` on the way down. The idle release is a
//! single finalizer reached from both the success and failure paths, so it
//! runs exactly once per execution, and a failed release is an operational
//! alarm rather than the job's verdict.
//!
//! # Components
//!
//! - **`state`** — workflow states, events, and the transition function
//! - **`orchestrator`** — starts, drives, cancels, and recovers executions
//! - **`config`** — timing and target settings

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod state;

pub use config::WorkflowConfig;
pub use error::{WorkflowError, WorkflowResult};
pub use orchestrator::{ExecutionHandle, Orchestrator, WorkflowOutcome};
pub use state::{WorkflowEvent, WorkflowState};
