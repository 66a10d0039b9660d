use thiserror::Error;

use crate::adapter::{AdapterError, Capability};

/// Crate-wide error type.
///
/// Request-level adapter failures never surface here: the stressor records
/// them as measured outcomes. This type covers everything that aborts a
/// stage or a run.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("operation {0} is already registered")]
    DuplicateOperation(String),
    #[error("invalid operation selector: {0}")]
    InvalidSelector(String),
    #[error("service does not provide capability {0}")]
    MissingCapability(Capability),
    #[error("unknown stage type: {0}")]
    UnknownStage(String),
    #[error("invalid configuration for stage {stage}: {reason}")]
    InvalidConfig { stage: String, reason: String },
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("stressor aborted: {0}")]
    StressorAborted(String),
    /// A stressor gave up on the stage without contradicting the service
    #[error("stressor failed: {0}")]
    StressorFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    pub(crate) fn invalid_config(stage: &str, reason: impl Into<String>) -> Self {
        HarnessError::InvalidConfig {
            stage: stage.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
