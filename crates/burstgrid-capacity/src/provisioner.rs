//! Provisioner — simulated capacity platform.
//!
//! Periodically scans pool records and promotes each pool's requested
//! target to applied once the provisioning delay has passed since the
//! request. This is the platform side of [`StoreCapacityBackend`]: callers
//! only ever request, and readiness is observed through the applied target
//! this loop writes.
//!
//! [`StoreCapacityBackend`]: crate::StoreCapacityBackend

use std::time::Duration;

use tracing::{debug, info};

use burstgrid_state::*;

/// Reconciles applied capacity toward requested capacity.
pub struct Provisioner {
    state: StateStore,
    /// Lag between a request and the platform applying it.
    delay: Duration,
}

impl Provisioner {
    pub fn new(state: StateStore, delay: Duration) -> Self {
        Self { state, delay }
    }

    /// Apply every pending request older than the provisioning delay.
    ///
    /// Returns the pools whose applied target changed.
    pub fn reconcile_once(&self) -> StateResult<Vec<(PoolId, CapacityTarget)>> {
        let cutoff = epoch_millis().saturating_sub(self.delay.as_millis() as u64);
        let mut applied = Vec::new();

        for pool in self.state.list_pools()? {
            if pool.is_converged() {
                continue;
            }
            if let Some(target) = self.state.apply_pool_target(&pool.pool_id, cutoff)? {
                debug!(pool = %pool.pool_id, %target, "capacity applied");
                applied.push((pool.pool_id, target));
            }
        }

        Ok(applied)
    }

    /// Run the reconcile loop.
    pub async fn run(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(
            interval_ms = interval.as_millis() as u64,
            delay_ms = self.delay.as_millis() as u64,
            "provisioner started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.reconcile_once() {
                        tracing::error!(error = %e, "provisioner reconcile failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("provisioner shutting down");
                    break;
                }
            }
        }
    }
}
