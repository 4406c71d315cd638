use std::sync::Arc;
use std::time::Duration;

use eval_workflow_core::contract::{normalize_input, ExecutionReport, WorkflowInput};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::adapters::inference::ModelInvoker;
use crate::adapters::object_store::ObjectStore;
use crate::config::WorkflowConfig;
use crate::error::WorkflowError;
use crate::evaluator::Evaluator;
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::reader::BatchItemReader;
use crate::result_writer::ObjectStoreResultWriter;

/// Wires the orchestrator from configuration and injected capabilities.
pub fn build_orchestrator(
    config: &WorkflowConfig,
    store: Arc<dyn ObjectStore>,
    invoker: Arc<dyn ModelInvoker>,
) -> Orchestrator {
    let reader = BatchItemReader::new(Arc::clone(&store), config.max_items);
    let evaluator = Evaluator::new(
        invoker,
        config.model_id.clone(),
        config.generation,
        config.invocation_timeout,
    );
    let writer = ObjectStoreResultWriter::new(
        store,
        config.results_bucket.clone(),
        config.results_prefix.clone(),
    );

    Orchestrator::new(
        reader,
        Arc::new(evaluator),
        Arc::new(writer),
        OrchestratorSettings {
            concurrency: config.max_concurrency,
            retry: config.retry,
            drain_timeout: config.drain_timeout(),
        },
    )
}

/// Runs one execution for a workflow input event.
///
/// Input problems are returned as errors before anything is read. Once the
/// execution starts, the report is always returned, including for `Failed`.
pub async fn handle_workflow_event(
    event: Value,
    orchestrator: &Orchestrator,
    cancel: CancellationToken,
) -> Result<ExecutionReport, WorkflowError> {
    let input = normalize_input(parse_workflow_input(event)?)?;
    let execution_id = input.execution_id.clone().unwrap_or_else(new_execution_id);

    tracing::info!(
        event = "execution.started",
        execution_id = %execution_id,
        bucket = %input.bucket,
        key = %input.key,
    );

    let report = orchestrator
        .run(&execution_id, &input.manifest(), cancel)
        .await;
    Ok(report)
}

/// Runs one execution, cancelling it `abort_grace` before `remaining` runs
/// out.
///
/// Every execution that started yields its report whatever the status. Only
/// input problems are errors, so the async invoke never retries a finished
/// execution under the same id.
pub async fn run_before_deadline(
    event: Value,
    orchestrator: &Orchestrator,
    remaining: Duration,
    abort_grace: Duration,
) -> Result<ExecutionReport, WorkflowError> {
    let cancel = CancellationToken::new();
    let budget = remaining.saturating_sub(abort_grace);
    let deadline_guard = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            tracing::warn!(
                event = "execution.deadline",
                "invocation deadline approaching, aborting execution"
            );
            cancel.cancel();
        })
    };

    let outcome = handle_workflow_event(event, orchestrator, cancel).await;
    deadline_guard.abort();
    outcome
}

pub fn new_execution_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Accepts the input object itself, or the same object encoded as a JSON string.
fn parse_workflow_input(event: Value) -> Result<WorkflowInput, WorkflowError> {
    let payload = match event {
        Value::String(text) => serde_json::from_str::<Value>(&text)
            .map_err(|error| invalid_input(format!("malformed JSON input: {error}")))?,
        Value::Object(_) => event,
        _ => return Err(invalid_input("workflow input must be a JSON object")),
    };

    serde_json::from_value(payload)
        .map_err(|error| invalid_input(format!("malformed workflow input: {error}")))
}

fn invalid_input(message: impl Into<String>) -> WorkflowError {
    WorkflowError::InvalidInput(message.into())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use eval_workflow_core::contract::{ExecutionState, ABORTED_ERROR_CODE};
    use eval_workflow_core::prompt::InferenceRequest;
    use serde_json::json;

    use crate::adapters::memory::InMemoryObjectStore;
    use crate::config::RetryPolicy;

    use super::*;

    struct VerdictInvoker;

    #[async_trait]
    impl ModelInvoker for VerdictInvoker {
        async fn invoke_model(
            &self,
            _model_id: &str,
            _request: &InferenceRequest,
        ) -> Result<Vec<u8>, String> {
            Ok(br#"{"completion":" Looks right.\nY\nY"}"#.to_vec())
        }
    }

    /// Never answers within a lambda invocation.
    struct StalledInvoker;

    #[async_trait]
    impl ModelInvoker for StalledInvoker {
        async fn invoke_model(
            &self,
            _model_id: &str,
            _request: &InferenceRequest,
        ) -> Result<Vec<u8>, String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err("no answer".to_string())
        }
    }

    const ONE_ITEM: &str = r#"[{"input":"2+2","submission":"4","criteria":"correctness"}]"#;

    fn sample_config() -> WorkflowConfig {
        let mut config = WorkflowConfig::from_lookup(|name| {
            (name == "RESULTS_BUCKET").then(|| "results".to_string())
        })
        .expect("config should load");
        config.retry = RetryPolicy::no_retry();
        config
    }

    #[test]
    fn parses_object_and_string_inputs() {
        let from_object = parse_workflow_input(json!({"bucket": "input", "key": "a.json"}))
            .expect("object input should parse");
        let from_string =
            parse_workflow_input(json!("{\"bucket\":\"input\",\"key\":\"a.json\"}"))
                .expect("string input should parse");
        assert_eq!(from_object, from_string);
    }

    #[test]
    fn rejects_non_object_input() {
        let error = parse_workflow_input(json!([1, 2])).expect_err("array should fail");
        assert_eq!(error.error_code(), "InvalidInput");

        let error = parse_workflow_input(json!({"bucket": "input"})).expect_err("missing key");
        assert!(error.to_string().contains("key"));
    }

    #[tokio::test]
    async fn uses_execution_id_from_input() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.seed_object("input", "a.json", ONE_ITEM);
        let invoker = Arc::new(VerdictInvoker);
        let orchestrator = build_orchestrator(&sample_config(), store.clone(), invoker);

        let report = handle_workflow_event(
            json!({"bucket": "input", "key": "a.json", "execution_id": "exec-42"}),
            &orchestrator,
            CancellationToken::new(),
        )
        .await
        .expect("execution should run");

        assert_eq!(report.execution_id, "exec-42");
        assert_eq!(report.status, ExecutionState::Succeeded);
        let succeeded = store.object("results", "output/exec-42/SUCCEEDED_0.json");
        assert!(succeeded.is_some());
    }

    #[tokio::test]
    async fn generates_execution_id_when_absent() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.seed_object("input", "a.json", "[]");
        let orchestrator = build_orchestrator(&sample_config(), store, Arc::new(VerdictInvoker));

        let report = handle_workflow_event(
            json!({"bucket": "input", "key": "a.json"}),
            &orchestrator,
            CancellationToken::new(),
        )
        .await
        .expect("execution should run");

        assert!(uuid::Uuid::parse_str(&report.execution_id).is_ok());
        assert_eq!(report.total_items, 0);
        assert_eq!(report.status, ExecutionState::Succeeded);
    }

    #[tokio::test]
    async fn blank_bucket_is_rejected_before_reading() {
        let store = Arc::new(InMemoryObjectStore::new());
        let orchestrator = build_orchestrator(&sample_config(), store, Arc::new(VerdictInvoker));

        let error = handle_workflow_event(
            json!({"bucket": " ", "key": "a.json"}),
            &orchestrator,
            CancellationToken::new(),
        )
        .await
        .expect_err("input should fail");
        assert_eq!(
            error.to_string(),
            "invalid workflow input: bucket cannot be empty"
        );
    }

    #[tokio::test]
    async fn failed_execution_is_reported_not_raised() {
        let store = Arc::new(InMemoryObjectStore::new());
        let orchestrator = build_orchestrator(&sample_config(), store, Arc::new(VerdictInvoker));

        let report = run_before_deadline(
            json!({"bucket": "input", "key": "missing.json", "execution_id": "exec-7"}),
            &orchestrator,
            Duration::from_secs(900),
            Duration::from_secs(30),
        )
        .await
        .expect("a failed execution still returns its report");

        assert_eq!(report.execution_id, "exec-7");
        assert_eq!(report.status, ExecutionState::Failed);
        let error = report.error.expect("error should be reported");
        assert_eq!(error.error_code, "ManifestNotFound");
    }

    #[tokio::test(start_paused = true)]
    async fn execution_is_aborted_and_written_ahead_of_the_deadline() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.seed_object("input", "a.json", ONE_ITEM);
        let invoker = Arc::new(StalledInvoker);
        let orchestrator = build_orchestrator(&sample_config(), store.clone(), invoker);
        let started = tokio::time::Instant::now();

        let report = run_before_deadline(
            json!({"bucket": "input", "key": "a.json", "execution_id": "exec-9"}),
            &orchestrator,
            Duration::from_secs(60),
            Duration::from_secs(30),
        )
        .await
        .expect("an aborted execution still returns its report");

        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(report.status, ExecutionState::Aborted);
        assert_eq!(report.failed, 1);

        let failed = store
            .object("results", "output/exec-9/FAILED_0.json")
            .expect("partial results should be written");
        let failed: Value = serde_json::from_slice(&failed).expect("failed records");
        assert_eq!(failed[0]["error_code"], ABORTED_ERROR_CODE);
        let summary = store.object("results", "output/exec-9/manifest.json");
        assert!(summary.is_some());
    }
}
