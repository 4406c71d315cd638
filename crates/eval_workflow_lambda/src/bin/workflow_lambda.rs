use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_s3::primitives::ByteStream;
use eval_workflow_core::contract::ExecutionReport;
use eval_workflow_core::prompt::InferenceRequest;
use eval_workflow_lambda::adapters::inference::ModelInvoker;
use eval_workflow_lambda::adapters::object_store::{ObjectStore, StoreError};
use eval_workflow_lambda::config::WorkflowConfig;
use eval_workflow_lambda::error::WorkflowError;
use eval_workflow_lambda::handlers::workflow::{build_orchestrator, run_before_deadline};
use eval_workflow_lambda::orchestrator::Orchestrator;
use eval_workflow_lambda::telemetry;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;

struct S3ObjectStore {
    s3_client: aws_sdk_s3::Client,
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let output = self
            .s3_client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|error| {
                if error
                    .as_service_error()
                    .is_some_and(|service_error| service_error.is_no_such_key())
                {
                    StoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StoreError::Request(format!("failed to read object from s3: {error}"))
                }
            })?;

        output
            .body
            .collect()
            .await
            .map(|data| data.into_bytes().to_vec())
            .map_err(|error| StoreError::Request(format!("failed to read object body: {error}")))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.s3_client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map(|_| ())
            .map_err(|error| StoreError::Request(format!("failed to write object to s3: {error}")))
    }
}

struct BedrockModelInvoker {
    bedrock_client: aws_sdk_bedrockruntime::Client,
}

#[async_trait]
impl ModelInvoker for BedrockModelInvoker {
    async fn invoke_model(
        &self,
        model_id: &str,
        request: &InferenceRequest,
    ) -> Result<Vec<u8>, String> {
        let body = serde_json::to_vec(request)
            .map_err(|error| format!("failed to encode inference request: {error}"))?;

        self.bedrock_client
            .invoke_model()
            .model_id(model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body))
            .send()
            .await
            .map(|output| output.body.into_inner())
            .map_err(|error| format!("failed to invoke model {model_id}: {error}"))
    }
}

async fn handle_request(
    event: LambdaEvent<Value>,
    orchestrator: &Orchestrator,
    config: &WorkflowConfig,
) -> Result<ExecutionReport, Error> {
    let remaining = event
        .context
        .deadline()
        .duration_since(SystemTime::now())
        .unwrap_or_default();

    // Failed and aborted executions are reported, not raised: an error here
    // would make the async invoke retry the same execution id.
    run_before_deadline(event.payload, orchestrator, remaining, config.abort_grace)
        .await
        .map_err(|error| Error::from(error.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    telemetry::init();

    let config = WorkflowConfig::from_env().map_err(WorkflowError::from)?;
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore {
        s3_client: aws_sdk_s3::Client::new(&aws_config),
    });
    let invoker: Arc<dyn ModelInvoker> = Arc::new(BedrockModelInvoker {
        bedrock_client: aws_sdk_bedrockruntime::Client::new(&aws_config),
    });
    let orchestrator = build_orchestrator(&config, store, invoker);

    let handler = service_fn(|event| handle_request(event, &orchestrator, &config));
    lambda_runtime::run(handler).await
}
