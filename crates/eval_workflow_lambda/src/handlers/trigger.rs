use eval_workflow_core::contract::{ManifestRef, WorkflowInput};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::invoke::ExecutionStarter;
use crate::config::KeyFilter;
use crate::error::TriggerError;
use crate::handlers::workflow::new_execution_id;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartedExecution {
    pub execution_id: String,
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
    pub executions: Vec<StartedExecution>,
    pub skipped_keys: Vec<String>,
}

/// Starts one execution per created object in an S3 notification.
///
/// There is no deduplication: a redelivered notification starts another
/// execution. The first failing start aborts the handler so the event source
/// sees the error.
pub async fn handle_trigger_event(
    event: Value,
    filter: &KeyFilter,
    starter: &dyn ExecutionStarter,
) -> Result<TriggerResponse, TriggerError> {
    let manifests = decode_created_objects(&event)?;

    let mut executions = Vec::with_capacity(manifests.len());
    let mut skipped_keys = Vec::new();
    for manifest in manifests {
        if !filter.matches(&manifest.key) {
            tracing::info!(
                event = "trigger.skipped",
                bucket = %manifest.bucket,
                key = %manifest.key,
                "object key does not match manifest filter",
            );
            skipped_keys.push(manifest.key);
            continue;
        }

        let input = WorkflowInput {
            bucket: manifest.bucket.clone(),
            key: manifest.key.clone(),
            execution_id: Some(new_execution_id()),
        };
        starter
            .start_execution(&input)
            .await
            .map_err(|message| TriggerError::StartExecution {
                bucket: manifest.bucket.clone(),
                key: manifest.key.clone(),
                message,
            })?;

        let execution_id = input.execution_id.unwrap_or_default();
        tracing::info!(
            event = "trigger.execution_started",
            execution_id = %execution_id,
            bucket = %manifest.bucket,
            key = %manifest.key,
        );
        executions.push(StartedExecution {
            execution_id,
            bucket: manifest.bucket,
            key: manifest.key,
        });
    }

    Ok(TriggerResponse {
        status_code: 200,
        body: format!("Started {} workflow execution(s).", executions.len()),
        executions,
        skipped_keys,
    })
}

/// Created-object records only; other S3 event types are ignored.
fn decode_created_objects(event: &Value) -> Result<Vec<ManifestRef>, TriggerError> {
    let records = event
        .get("Records")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid_event("event must include a Records array"))?;

    let mut manifests = Vec::with_capacity(records.len());
    for record in records {
        let source = record.get("eventSource").and_then(Value::as_str);
        if source != Some("aws:s3") {
            return Err(TriggerError::InvalidEvent(format!(
                "unsupported event source: {}",
                source.unwrap_or("<missing>")
            )));
        }

        let is_created = record
            .get("eventName")
            .and_then(Value::as_str)
            .map_or(true, |name| name.starts_with("ObjectCreated:"));
        if !is_created {
            continue;
        }

        let bucket = record
            .pointer("/s3/bucket/name")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_event("record is missing s3.bucket.name"))?;
        let key = record
            .pointer("/s3/object/key")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_event("record is missing s3.object.key"))?;

        manifests.push(ManifestRef::new(bucket, decode_object_key(key)));
    }

    Ok(manifests)
}

fn invalid_event(message: &str) -> TriggerError {
    TriggerError::InvalidEvent(message.to_string())
}

/// S3 notifications encode keys like a form value: `+` is a space and
/// everything else reserved is `%XX`, including a literal `+` (`%2B`).
fn decode_object_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}
