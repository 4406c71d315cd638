//! Single-item evaluation: prompt in, completion out.

use std::sync::Arc;
use std::time::Duration;

use eval_workflow_core::contract::{Verdict, WorkItem};
use eval_workflow_core::error::EvaluationError;
use eval_workflow_core::prompt::{
    extract_completion, parse_verdict, GenerationParams, InferenceRequest,
};

use crate::adapters::inference::ModelInvoker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub output: String,
    pub verdict: Option<Verdict>,
}

#[derive(Clone)]
pub struct Evaluator {
    invoker: Arc<dyn ModelInvoker>,
    model_id: String,
    params: GenerationParams,
    timeout: Duration,
}

impl Evaluator {
    pub fn new(
        invoker: Arc<dyn ModelInvoker>,
        model_id: impl Into<String>,
        params: GenerationParams,
        timeout: Duration,
    ) -> Self {
        Self {
            invoker,
            model_id: model_id.into(),
            params,
            timeout,
        }
    }

    /// One inference call, bounded by the configured timeout. Never retries.
    pub async fn evaluate(&self, item: &WorkItem) -> Result<Evaluation, EvaluationError> {
        let request = InferenceRequest::for_item(item, self.params);

        let body = match tokio::time::timeout(
            self.timeout,
            self.invoker.invoke_model(&self.model_id, &request),
        )
        .await
        {
            Ok(Ok(body)) => body,
            Ok(Err(message)) => return Err(EvaluationError::inference(message)),
            Err(_) => {
                return Err(EvaluationError::timeout(format!(
                    "no response from {} within {}ms",
                    self.model_id,
                    self.timeout.as_millis()
                )));
            }
        };

        let envelope: serde_json::Value = serde_json::from_slice(&body).map_err(|error| {
            EvaluationError::malformed(format!("response body is not JSON: {error}"))
        })?;
        let output = extract_completion(&envelope)?;
        let verdict = parse_verdict(&output);

        Ok(Evaluation { output, verdict })
    }
}
