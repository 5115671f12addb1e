//! Capacity backend — the external platform that owns pool capacity.

use async_trait::async_trait;
use tracing::debug;

use burstgrid_state::{CapacityTarget, StateStore};

use crate::error::CapacityResult;

/// The platform that provisions execution units for pools.
///
/// Requests are fire-and-forget with respect to provisioning: `request`
/// returns once the target is recorded, and `applied` keeps reporting the
/// previous live target until the platform catches up. Implementations are
/// shared between concurrent executions; requests for the same pool are
/// last-write-wins.
#[async_trait]
pub trait CapacityBackend: Send + Sync {
    /// Record `target` as the pool's desired capacity.
    async fn request(&self, pool_id: &str, target: CapacityTarget) -> CapacityResult<()>;

    /// The pool's currently live capacity (`{0,0}` if never applied).
    async fn applied(&self, pool_id: &str) -> CapacityResult<CapacityTarget>;
}

/// Capacity backend persisted in the state store's `pools` table.
///
/// Pairs with [`Provisioner`](crate::Provisioner), which plays the platform
/// side and moves `applied` toward `requested`.
#[derive(Clone)]
pub struct StoreCapacityBackend {
    state: StateStore,
}

impl StoreCapacityBackend {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }
}

#[async_trait]
impl CapacityBackend for StoreCapacityBackend {
    async fn request(&self, pool_id: &str, target: CapacityTarget) -> CapacityResult<()> {
        let changed = self.state.request_pool_target(pool_id, target)?;
        if !changed {
            debug!(pool = %pool_id, %target, "target already requested");
        }
        Ok(())
    }

    async fn applied(&self, pool_id: &str) -> CapacityResult<CapacityTarget> {
        Ok(self
            .state
            .get_pool(pool_id)?
            .map(|pool| pool.applied)
            .unwrap_or(CapacityTarget::IDLE))
    }
}
