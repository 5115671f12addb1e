//! Job stages.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use burstgrid_state::Job;

/// Input key naming a simulated stage that should fail for this job.
pub const FAIL_STAGE_KEY: &str = "fail_stage";

/// One step of a multi-stage job. Each stage can fail independently.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Run the stage. `Err` carries a human-readable cause.
    async fn run(&self, job: &Job) -> Result<Value, String>;
}

/// Stand-in for real media work: sleeps for `duration` and returns a
/// canned output derived from the job input.
///
/// Fails when the job input's `fail_stage` names this stage.
pub struct SimulatedStage {
    name: String,
    duration: Duration,
    output: fn(&Job) -> Value,
}

impl SimulatedStage {
    pub fn new(name: &str, duration: Duration, output: fn(&Job) -> Value) -> Self {
        Self {
            name: name.to_string(),
            duration,
            output,
        }
    }

    /// Thumbnails, transcodes, analysis, subtitles, in that order.
    pub fn media_pipeline(duration: Duration) -> Vec<SimulatedStage> {
        vec![
            SimulatedStage::new("thumbnail", duration, |job| {
                let uri = media_uri(job);
                json!({ "thumbnails": [format!("{uri}.thumb-0.jpg"), format!("{uri}.thumb-1.jpg")] })
            }),
            SimulatedStage::new("transcode", duration, |job| {
                let uri = media_uri(job);
                let renditions: Vec<String> = ["1080p", "720p", "480p"]
                    .iter()
                    .map(|r| format!("{uri}.{r}.mp4"))
                    .collect();
                json!({ "renditions": renditions })
            }),
            SimulatedStage::new("analyze", duration, |_| {
                json!({ "labels": ["speech", "outdoor"], "scene_changes": 14 })
            }),
            SimulatedStage::new("subtitles", duration, |job| {
                json!({ "subtitles": format!("{}.en.vtt", media_uri(job)) })
            }),
        ]
    }
}

#[async_trait]
impl Stage for SimulatedStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, job: &Job) -> Result<Value, String> {
        tokio::time::sleep(self.duration).await;
        if job.input.get(FAIL_STAGE_KEY).and_then(Value::as_str) == Some(self.name.as_str()) {
            return Err(format!("simulated {} failure", self.name));
        }
        Ok((self.output)(job))
    }
}

fn media_uri(job: &Job) -> String {
    job.input
        .get("media_uri")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("media/{}", job.id))
}
