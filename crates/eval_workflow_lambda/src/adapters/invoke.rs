use async_trait::async_trait;
use eval_workflow_core::contract::WorkflowInput;

/// Starts one workflow execution. Implementations must not deduplicate.
#[async_trait]
pub trait ExecutionStarter: Send + Sync {
    async fn start_execution(&self, input: &WorkflowInput) -> Result<(), String>;
}
