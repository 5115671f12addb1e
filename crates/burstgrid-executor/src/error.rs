use thiserror::Error;

/// Failure of one stage of a job, passed through unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct ExecutionError {
    pub stage: String,
    pub message: String,
}

impl ExecutionError {
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
        }
    }
}
