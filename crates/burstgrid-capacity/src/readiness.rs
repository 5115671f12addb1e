//! Readiness poller — waits for a requested target to go live.
//!
//! Polls at a fixed interval with no backoff: provisioning is expected to
//! finish in bounded time, so a short constant interval keeps latency low
//! without hammering the control plane. Every poll re-reads the applied
//! target through the controller.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use burstgrid_state::CapacityTarget;

use crate::controller::CapacityController;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Floor for the poll interval. A zero interval would spin.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of a readiness wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The applied target matched the requested one.
    Ready(CapacityTarget),
    /// The deadline passed first. Not an error; the caller decides.
    TimedOut {
        last_applied: Option<CapacityTarget>,
        polls: u32,
    },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready(_))
    }
}

#[derive(Clone)]
pub struct ReadinessPoller {
    controller: CapacityController,
}

impl ReadinessPoller {
    pub fn new(controller: CapacityController) -> Self {
        Self { controller }
    }

    /// Poll until `pool_id`'s applied target equals `target` and is ready,
    /// or until `deadline` has elapsed.
    ///
    /// Backend read errors are treated as transient and polling continues.
    /// An idle `target` can never be ready and always times out.
    pub async fn await_ready(
        &self,
        pool_id: &str,
        target: CapacityTarget,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Readiness {
        let interval = poll_interval.max(MIN_POLL_INTERVAL);
        // Unrepresentable deadlines never expire.
        let deadline_at = Instant::now().checked_add(deadline);
        let mut polls = 0u32;
        let mut last_applied = None;

        loop {
            polls += 1;
            match self.controller.get_applied_target(pool_id).await {
                Ok(applied) if applied == target && applied.is_ready() => {
                    debug!(pool = %pool_id, %applied, polls, "pool ready");
                    return Readiness::Ready(applied);
                }
                Ok(applied) => last_applied = Some(applied),
                Err(e) => {
                    warn!(pool = %pool_id, error = %e, "applied target read failed, will re-poll");
                }
            }

            let remaining =
                deadline_at.map_or(interval, |at| at.saturating_duration_since(Instant::now()));
            if remaining.is_zero() {
                debug!(pool = %pool_id, %target, polls, "readiness deadline reached");
                return Readiness::TimedOut {
                    last_applied,
                    polls,
                };
            }
            tokio::time::sleep(interval.min(remaining)).await;
        }
    }
}
