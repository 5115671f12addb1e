//! Capacity controller — validated target requests and applied reads.

use std::sync::Arc;

use tracing::{debug, info};

use burstgrid_state::CapacityTarget;

use crate::backend::CapacityBackend;
use crate::error::{CapacityError, CapacityResult};

/// Front door to the capacity platform.
///
/// Holds no capacity state of its own: every call goes straight to the
/// backend, so readers never see a cached applied target.
#[derive(Clone)]
pub struct CapacityController {
    backend: Arc<dyn CapacityBackend>,
}

impl CapacityController {
    pub fn new(backend: Arc<dyn CapacityBackend>) -> Self {
        Self { backend }
    }

    /// Request `target` for `pool_id` and return without waiting for it to
    /// be provisioned.
    ///
    /// Rejects `min_units > max_units` with `InvalidTarget` before the
    /// backend is contacted. Repeating an identical request is a no-op.
    pub async fn request_target(&self, pool_id: &str, target: CapacityTarget) -> CapacityResult<()> {
        if !target.is_valid() {
            return Err(CapacityError::InvalidTarget {
                pool_id: pool_id.to_string(),
                target,
            });
        }
        self.backend.request(pool_id, target).await?;
        if target.is_idle() {
            info!(pool = %pool_id, "idle target requested");
        } else {
            info!(pool = %pool_id, %target, "capacity target requested");
        }
        Ok(())
    }

    /// The target the platform currently has live for `pool_id`.
    pub async fn get_applied_target(&self, pool_id: &str) -> CapacityResult<CapacityTarget> {
        let applied = self.backend.applied(pool_id).await?;
        debug!(pool = %pool_id, %applied, "applied target read");
        Ok(applied)
    }
}
