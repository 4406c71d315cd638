use async_trait::async_trait;
use eval_workflow_core::prompt::InferenceRequest;

/// Hosted model endpoint. Returns the raw response body.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke_model(
        &self,
        model_id: &str,
        request: &InferenceRequest,
    ) -> Result<Vec<u8>, String>;
}
