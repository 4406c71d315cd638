use eval_workflow_core::error::{ManifestError, ValidationError};

use crate::config::ConfigError;
use crate::result_writer::ResultWriteError;

/// Failures that end a workflow execution or prevent it from starting.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("invalid workflow input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    ResultWrite(#[from] ResultWriteError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl WorkflowError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "InvalidInput",
            Self::Manifest(error) => error.error_code(),
            Self::ResultWrite(_) => "ResultWriteError",
            Self::Config(_) => "ConfigError",
        }
    }
}

impl From<ValidationError> for WorkflowError {
    fn from(error: ValidationError) -> Self {
        Self::InvalidInput(error.message().to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("invalid trigger event: {0}")]
    InvalidEvent(String),

    #[error("failed to start execution for s3://{bucket}/{key}: {message}")]
    StartExecution {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
