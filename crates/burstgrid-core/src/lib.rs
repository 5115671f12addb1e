pub mod config;
pub mod duration;

pub use config::{
    BurstConfig, ConfigError, ConfigResult, ExecutorSettings, PoolConfig, ProvisionerSettings,
    ServerConfig, WorkflowSettings,
};
pub use duration::parse_duration;
