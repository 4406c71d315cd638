//! Error taxonomy shared by the reader, the evaluation task and the handlers.

/// Manifest-level failures. All of them are fatal to an execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest s3://{bucket}/{key} does not exist")]
    NotFound { bucket: String, key: String },

    #[error("manifest s3://{bucket}/{key} could not be read: {message}")]
    Unreadable {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("{}", parse_error_message(.index, .message))]
    Parse {
        index: Option<usize>,
        message: String,
    },
}

impl ManifestError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            index: None,
            message: message.into(),
        }
    }

    pub fn parse_at(index: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            index: Some(index),
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "ManifestNotFound",
            Self::Unreadable { .. } => "ManifestUnreadable",
            Self::Parse { .. } => "ManifestParseError",
        }
    }
}

fn parse_error_message(index: &Option<usize>, message: &str) -> String {
    match index {
        Some(index) => format!("manifest item {index} is invalid: {message}"),
        None => format!("manifest is not valid JSON: {message}"),
    }
}

/// Per-item failures of the evaluation task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    #[error("inference call failed: {message}")]
    Inference { message: String, timed_out: bool },

    #[error("model response is malformed: {message}")]
    MalformedResponse { message: String },
}

impl EvaluationError {
    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Inference {
            message: message.into(),
            timed_out: true,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    /// Stable code persisted in failure records.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Inference { .. } => "InferenceError",
            Self::MalformedResponse { .. } => "MalformedResponse",
        }
    }

    /// Malformed responses repeat for the same prompt, so only endpoint
    /// failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Inference { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_message_mentions_item_index() {
        let error = ManifestError::parse_at(3, "missing field `criteria`");
        assert_eq!(
            error.to_string(),
            "manifest item 3 is invalid: missing field `criteria`"
        );
        assert_eq!(error.error_code(), "ManifestParseError");
    }

    #[test]
    fn only_inference_errors_are_retryable() {
        assert!(EvaluationError::inference("throttled").is_retryable());
        assert!(EvaluationError::timeout("60s elapsed").is_retryable());
        assert!(!EvaluationError::malformed("no completion").is_retryable());
        assert_eq!(
            EvaluationError::malformed("no completion").error_code(),
            "MalformedResponse"
        );
    }
}
