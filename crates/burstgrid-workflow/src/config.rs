//! Workflow timing and target settings.

use std::time::Duration;

use burstgrid_capacity::DEFAULT_POLL_INTERVAL;
use burstgrid_core::{BurstConfig, ConfigResult};
use burstgrid_state::{CapacityTarget, PoolId};

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Pool assigned to jobs submitted without one.
    pub pool_id: PoolId,
    /// Target requested for every batch. The only non-idle shape used.
    pub high_target: CapacityTarget,
    /// Fixed delay between readiness polls.
    pub poll_interval: Duration,
    /// Length of one poll round; a round that times out is re-polled.
    pub poll_timeout: Duration,
    /// Overall time allowed to reach readiness, from execution start.
    pub deadline: Duration,
    /// How long to wait for the executor before giving up on it.
    pub execution_timeout: Option<Duration>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            pool_id: "media-pool".to_string(),
            high_target: CapacityTarget::new(2, 5),
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: Duration::from_secs(30),
            deadline: Duration::from_secs(600),
            execution_timeout: None,
        }
    }
}

impl WorkflowConfig {
    pub fn from_config(config: &BurstConfig) -> ConfigResult<Self> {
        Ok(Self {
            pool_id: config.pool.id.clone(),
            high_target: CapacityTarget::new(config.pool.min_units, config.pool.max_units),
            poll_interval: config.poll_interval()?,
            poll_timeout: config.poll_timeout()?,
            deadline: config.deadline()?,
            execution_timeout: config.execution_timeout()?,
        })
    }
}
