use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{EvaluationError, ValidationError};

pub const RESULT_RECORD_SCHEMA_VERSION: &str = "v1";
pub const EXECUTION_SUMMARY_SCHEMA_VERSION: &str = "v1";
pub const ABORTED_ERROR_CODE: &str = "Aborted";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ManifestRef {
    pub bucket: String,
    pub key: String,
}

impl ManifestRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for ManifestRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Input document of one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowInput {
    pub bucket: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

impl WorkflowInput {
    pub fn manifest(&self) -> ManifestRef {
        ManifestRef::new(self.bucket.clone(), self.key.clone())
    }
}

pub fn normalize_input(input: WorkflowInput) -> Result<WorkflowInput, ValidationError> {
    let bucket = input.bucket.trim().to_string();
    if bucket.is_empty() {
        return Err(ValidationError::new("bucket cannot be empty"));
    }

    // Object keys may legitimately carry surrounding whitespace.
    if input.key.trim().is_empty() {
        return Err(ValidationError::new("key cannot be empty"));
    }

    let execution_id = match input.execution_id {
        Some(value) if value.trim().is_empty() => {
            return Err(ValidationError::new("execution_id must be non-empty when provided"));
        }
        Some(value) => Some(value.trim().to_string()),
        None => None,
    };

    Ok(WorkflowInput {
        bucket,
        key: input.key,
        execution_id,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkItem {
    pub input: String,
    pub submission: String,
    pub criteria: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexedItem {
    pub index: usize,
    pub item: WorkItem,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Verdict {
    #[serde(rename = "Y")]
    Yes,
    #[serde(rename = "N")]
    No,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Succeeded {
        output: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        verdict: Option<Verdict>,
        attempts: u32,
    },
    Failed {
        error_code: String,
        error_message: String,
        attempts: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationResult {
    pub index: usize,
    pub item: WorkItem,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

impl EvaluationResult {
    pub fn failed(indexed: IndexedItem, error: &EvaluationError, attempts: u32) -> Self {
        Self {
            index: indexed.index,
            item: indexed.item,
            outcome: ItemOutcome::Failed {
                error_code: error.error_code().to_string(),
                error_message: error.to_string(),
                attempts,
            },
        }
    }

    pub fn aborted(indexed: IndexedItem) -> Self {
        Self {
            index: indexed.index,
            item: indexed.item,
            outcome: ItemOutcome::Failed {
                error_code: ABORTED_ERROR_CODE.to_string(),
                error_message: "execution aborted before the item was dispatched".to_string(),
                attempts: 0,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Pending,
    Reading,
    Mapping,
    Collecting,
    Succeeded,
    Failed,
    Aborted,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        match (self, next) {
            (Pending, Reading) => true,
            (Reading, Mapping) | (Reading, Failed) | (Reading, Aborted) => true,
            (Mapping, Collecting) => true,
            (Collecting, Succeeded) | (Collecting, Failed) | (Collecting, Aborted) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Reading => "READING",
            Self::Mapping => "MAPPING",
            Self::Collecting => "COLLECTING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Aborted => "ABORTED",
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultLocation {
    pub bucket: String,
    pub prefix: String,
    pub succeeded_key: String,
    pub failed_key: String,
    pub summary_key: String,
}

/// Document written next to the per-status result files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub manifest: ManifestRef,
    pub manifest_fingerprint: String,
    pub status: ExecutionState,
    pub total_items: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub succeeded_key: String,
    pub failed_key: String,
    pub event_time: String,
    pub record_schema: String,
    pub schema_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionError {
    pub error_code: String,
    pub error_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionReport {
    pub execution_id: String,
    pub manifest: ManifestRef,
    pub status: ExecutionState,
    pub state_history: Vec<ExecutionState>,
    pub total_items: usize,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_location: Option<ResultLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
}

/// SHA-256 of the raw manifest bytes, hex encoded.
pub fn manifest_fingerprint(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("{:x}", hasher.finalize())
}
