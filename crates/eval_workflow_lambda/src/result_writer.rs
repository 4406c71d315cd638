//! Persists an execution's aggregate results to the output store.

use std::sync::Arc;

use async_trait::async_trait;
use eval_workflow_core::contract::{
    EvaluationResult, ExecutionState, ExecutionSummary, ManifestRef, ResultLocation,
    EXECUTION_SUMMARY_SCHEMA_VERSION, RESULT_RECORD_SCHEMA_VERSION,
};
use eval_workflow_core::storage_keys::{
    execution_prefix, failed_object_key, succeeded_object_key, summary_object_key,
};

use crate::adapters::object_store::ObjectStore;

const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to persist results to {key}: {message}")]
pub struct ResultWriteError {
    pub key: String,
    pub message: String,
}

/// Everything the writer needs to know about one finished mapping phase.
#[derive(Debug, Clone, Copy)]
pub struct ResultBatch<'a> {
    pub execution_id: &'a str,
    pub manifest: &'a ManifestRef,
    pub manifest_fingerprint: &'a str,
    /// Terminal status the execution reaches if the write succeeds.
    pub status: ExecutionState,
    pub event_time: &'a str,
    pub results: &'a [EvaluationResult],
}

#[async_trait]
pub trait ResultWriter: Send + Sync {
    async fn write_results(
        &self,
        batch: ResultBatch<'_>,
    ) -> Result<ResultLocation, ResultWriteError>;
}

pub struct ObjectStoreResultWriter {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
}

impl ObjectStoreResultWriter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    async fn put_json(
        &self,
        key: &str,
        value: &impl serde::Serialize,
    ) -> Result<(), ResultWriteError> {
        let body = serde_json::to_vec(value).map_err(|error| ResultWriteError {
            key: key.to_string(),
            message: format!("serialization failed: {error}"),
        })?;

        self.store
            .put_object(&self.bucket, key, body, JSON_CONTENT_TYPE)
            .await
            .map_err(|error| ResultWriteError {
                key: key.to_string(),
                message: error.to_string(),
            })
    }
}

#[async_trait]
impl ResultWriter for ObjectStoreResultWriter {
    async fn write_results(
        &self,
        batch: ResultBatch<'_>,
    ) -> Result<ResultLocation, ResultWriteError> {
        let succeeded_key = succeeded_object_key(&self.prefix, batch.execution_id);
        let failed_key = failed_object_key(&self.prefix, batch.execution_id);
        let summary_key = summary_object_key(&self.prefix, batch.execution_id);

        let mut results: Vec<&EvaluationResult> = batch.results.iter().collect();
        results.sort_by_key(|result| result.index);
        let (succeeded, failed): (Vec<&EvaluationResult>, Vec<&EvaluationResult>) =
            results.into_iter().partition(|result| result.is_success());

        self.put_json(&succeeded_key, &succeeded).await?;
        self.put_json(&failed_key, &failed).await?;

        // Written last: its presence marks a complete result set.
        let summary = ExecutionSummary {
            execution_id: batch.execution_id.to_string(),
            manifest: batch.manifest.clone(),
            manifest_fingerprint: batch.manifest_fingerprint.to_string(),
            status: batch.status,
            total_items: batch.results.len(),
            succeeded: succeeded.len(),
            failed: failed.len(),
            succeeded_key: succeeded_key.clone(),
            failed_key: failed_key.clone(),
            event_time: batch.event_time.to_string(),
            record_schema: RESULT_RECORD_SCHEMA_VERSION.to_string(),
            schema_version: EXECUTION_SUMMARY_SCHEMA_VERSION.to_string(),
        };
        self.put_json(&summary_key, &summary).await?;

        Ok(ResultLocation {
            bucket: self.bucket.clone(),
            prefix: execution_prefix(&self.prefix, batch.execution_id),
            succeeded_key,
            failed_key,
            summary_key,
        })
    }
}
