//! Sequential stage runner.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use burstgrid_state::Job;

use crate::JobExecutor;
use crate::error::ExecutionError;
use crate::stage::{SimulatedStage, Stage};

/// Runs stages in order and merges their outputs into one object keyed
/// by stage name. The first failing stage ends the run; outputs of the
/// stages before it are dropped.
#[derive(Clone, Default)]
pub struct StagedExecutor {
    stages: Vec<Arc<dyn Stage>>,
}

impl StagedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// The simulated media pipeline with every stage taking `stage_duration`.
    pub fn media_pipeline(stage_duration: Duration) -> Self {
        SimulatedStage::media_pipeline(stage_duration)
            .into_iter()
            .fold(Self::new(), |exec, stage| exec.with_stage(Arc::new(stage)))
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl JobExecutor for StagedExecutor {
    async fn execute(&self, job: &Job) -> Result<Value, ExecutionError> {
        let mut outputs = Map::new();

        for stage in &self.stages {
            debug!(job_id = %job.id, stage = stage.name(), "stage starting");
            match stage.run(job).await {
                Ok(output) => {
                    outputs.insert(stage.name().to_string(), output);
                }
                Err(message) => {
                    warn!(job_id = %job.id, stage = stage.name(), %message, "stage failed");
                    return Err(ExecutionError::new(stage.name(), message));
                }
            }
        }

        info!(job_id = %job.id, stages = self.stages.len(), "job stages complete");
        Ok(Value::Object(outputs))
    }
}
