//! burstgrid.toml configuration parser.
//!
//! Every section is optional; missing fields fall back to defaults suited
//! to a single-node daemon driving one compute pool.
//!
//! ```toml
//! [server]
//! port = 8480
//! data_dir = "/var/lib/burstgrid"
//!
//! [pool]
//! id = "media-pool"
//! min_units = 2
//! max_units = 5
//!
//! [workflow]
//! poll_interval = "1s"
//! poll_timeout = "30s"
//! deadline = "10m"
//! execution_timeout = "30m"
//!
//! [provisioner]
//! interval = "500ms"
//! delay = "3s"
//!
//! [executor]
//! stage_duration = "2s"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for `{field}`: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub workflow: WorkflowSettings,
    pub provisioner: ProvisionerSettings,
    pub executor: ExecutorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8480,
            data_dir: PathBuf::from("/var/lib/burstgrid"),
        }
    }
}

/// The pool jobs run on and the "high" target requested for each batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub id: String,
    pub min_units: u32,
    pub max_units: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            id: "media-pool".to_string(),
            min_units: 2,
            max_units: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Fixed delay between readiness polls.
    pub poll_interval: String,
    /// Length of one readiness poll round before re-polling.
    pub poll_timeout: String,
    /// Overall deadline for reaching readiness, measured from execution start.
    pub deadline: String,
    /// Optional cap on how long the workflow waits for the executor.
    pub execution_timeout: Option<String>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            poll_interval: "1s".to_string(),
            poll_timeout: "30s".to_string(),
            deadline: "10m".to_string(),
            execution_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerSettings {
    /// How often the simulated platform reconciles pools.
    pub interval: String,
    /// Lag between a target request and the platform applying it.
    pub delay: String,
}

impl Default for ProvisionerSettings {
    fn default() -> Self {
        Self {
            interval: "500ms".to_string(),
            delay: "3s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Simulated duration of each media stage.
    pub stage_duration: String,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            stage_duration: "2s".to_string(),
        }
    }
}

impl BurstConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> ConfigResult<Self> {
        let config: BurstConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Check every duration parses and the pool target is usable.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.pool.id.trim().is_empty() {
            return Err(ConfigError::Invalid("pool.id must not be empty".into()));
        }
        if self.pool.min_units > self.pool.max_units {
            return Err(ConfigError::Invalid(format!(
                "pool.min_units ({}) exceeds pool.max_units ({})",
                self.pool.min_units, self.pool.max_units
            )));
        }
        if self.pool.min_units == 0 || self.pool.max_units == 0 {
            return Err(ConfigError::Invalid(
                "pool target must have positive bounds to ever become ready".into(),
            ));
        }
        if self.poll_interval()?.is_zero() {
            return Err(ConfigError::Invalid("workflow.poll_interval must be non-zero".into()));
        }
        self.poll_timeout()?;
        self.deadline()?;
        self.execution_timeout()?;
        self.provisioner_interval()?;
        self.provisioning_delay()?;
        self.stage_duration()?;
        Ok(())
    }

    pub fn poll_interval(&self) -> ConfigResult<Duration> {
        duration_field("workflow.poll_interval", &self.workflow.poll_interval)
    }

    pub fn poll_timeout(&self) -> ConfigResult<Duration> {
        duration_field("workflow.poll_timeout", &self.workflow.poll_timeout)
    }

    pub fn deadline(&self) -> ConfigResult<Duration> {
        duration_field("workflow.deadline", &self.workflow.deadline)
    }

    pub fn execution_timeout(&self) -> ConfigResult<Option<Duration>> {
        self.workflow
            .execution_timeout
            .as_deref()
            .map(|v| duration_field("workflow.execution_timeout", v))
            .transpose()
    }

    pub fn provisioner_interval(&self) -> ConfigResult<Duration> {
        duration_field("provisioner.interval", &self.provisioner.interval)
    }

    pub fn provisioning_delay(&self) -> ConfigResult<Duration> {
        duration_field("provisioner.delay", &self.provisioner.delay)
    }

    pub fn stage_duration(&self) -> ConfigResult<Duration> {
        duration_field("executor.stage_duration", &self.executor.stage_duration)
    }
}

fn duration_field(field: &'static str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    })
}
