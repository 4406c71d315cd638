use async_trait::async_trait;
use aws_sdk_lambda::types::InvocationType;
use eval_workflow_core::contract::WorkflowInput;
use eval_workflow_lambda::adapters::invoke::ExecutionStarter;
use eval_workflow_lambda::config::TriggerConfig;
use eval_workflow_lambda::error::TriggerError;
use eval_workflow_lambda::handlers::trigger::{handle_trigger_event, TriggerResponse};
use eval_workflow_lambda::telemetry;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;

struct LambdaExecutionStarter {
    lambda_client: aws_sdk_lambda::Client,
    workflow_function_arn: String,
}

#[async_trait]
impl ExecutionStarter for LambdaExecutionStarter {
    async fn start_execution(&self, input: &WorkflowInput) -> Result<(), String> {
        let payload = serde_json::to_vec(input)
            .map_err(|error| format!("failed to encode workflow input: {error}"))?;

        self.lambda_client
            .invoke()
            .function_name(&self.workflow_function_arn)
            .invocation_type(InvocationType::Event)
            .set_payload(Some(payload.into()))
            .send()
            .await
            .map(|_| ())
            .map_err(|error| format!("failed to start workflow execution: {error}"))
    }
}

async fn handle_request(
    event: LambdaEvent<Value>,
    config: &TriggerConfig,
    starter: &LambdaExecutionStarter,
) -> Result<TriggerResponse, Error> {
    handle_trigger_event(event.payload, &config.filter, starter)
        .await
        .map_err(|error| Error::from(error.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    telemetry::init();

    let config = TriggerConfig::from_env().map_err(TriggerError::from)?;
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let starter = LambdaExecutionStarter {
        lambda_client: aws_sdk_lambda::Client::new(&aws_config),
        workflow_function_arn: config.workflow_function_arn.clone(),
    };

    lambda_runtime::run(service_fn(|event| handle_request(event, &config, &starter))).await
}
