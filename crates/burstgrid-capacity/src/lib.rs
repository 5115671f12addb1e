//! burstgrid-capacity — elastic capacity for compute pools.
//!
//! Callers never touch capacity state directly. They go through the
//! [`CapacityController`], which validates a target and forwards it to a
//! [`CapacityBackend`]; the backend stands in for the external platform
//! that actually provisions execution units.
//!
//! # Components
//!
//! - **`backend`** — the platform contract plus a redb-backed implementation
//! - **`controller`** — validated, idempotent target requests and applied reads
//! - **`readiness`** — fixed-interval poll until the applied target matches
//! - **`provisioner`** — simulated platform loop that applies requests after a delay
//!
//! ```text
//! request_target ──► backend.request ──► pools.requested
//!                                             │ provisioning delay
//!                                             ▼
//! await_ready ◄── get_applied_target ◄── pools.applied
//! ```

pub mod backend;
pub mod controller;
pub mod error;
pub mod provisioner;
pub mod readiness;

pub use backend::{CapacityBackend, StoreCapacityBackend};
pub use controller::CapacityController;
pub use error::{CapacityError, CapacityResult};
pub use provisioner::Provisioner;
pub use readiness::{DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL, Readiness, ReadinessPoller};
