//! Evaluation prompt and the inference request/response contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::{Verdict, WorkItem};
use crate::error::EvaluationError;

pub const DEFAULT_MAX_TOKENS_TO_SAMPLE: u32 = 1000;
pub const DEFAULT_TEMPERATURE: f32 = 1.0;

/// Placeholders are filled positionally: input, submission, criteria.
pub const EVALUATION_CRITERIA_PROMPT: &str = "You are assessing a submitted answer on a given task or input based on a set of criteria. Here is the data:
[BEGIN DATA]
***
[Input]: {}
***
[Submission]: {}
***
[Criteria]: {}
***
[END DATA]
Does the submission meet the Criteria? First, write out in a step by step manner your reasoning about each criterion to be sure that your conclusion is correct. Avoid simply stating the correct answers at the outset. Then print only the single character \"Y\" or \"N\" (without quotes or punctuation) on its own line corresponding to the correct answer of whether the submission meets all criteria. At the end, repeat just the letter again by itself on a new line.";

const HUMAN_TURN: &str = "Human: ";
const ASSISTANT_TURN: &str = ".  Assistant:";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens_to_sample: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens_to_sample: DEFAULT_MAX_TOKENS_TO_SAMPLE,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferenceRequest {
    pub prompt: String,
    pub max_tokens_to_sample: u32,
    pub temperature: f32,
}

impl InferenceRequest {
    pub fn for_item(item: &WorkItem, params: GenerationParams) -> Self {
        Self {
            prompt: build_prompt(item),
            max_tokens_to_sample: params.max_tokens_to_sample,
            temperature: params.temperature,
        }
    }
}

/// Fills the template in order. Substituted text is never re-scanned, so a
/// field containing `{}` cannot shift the following fields.
pub fn build_prompt(item: &WorkItem) -> String {
    let fields = [
        item.input.as_str(),
        item.submission.as_str(),
        item.criteria.as_str(),
    ];
    let mut body = String::with_capacity(
        EVALUATION_CRITERIA_PROMPT.len() + fields.iter().map(|field| field.len()).sum::<usize>(),
    );
    let mut segments = EVALUATION_CRITERIA_PROMPT.split("{}");
    if let Some(head) = segments.next() {
        body.push_str(head);
    }
    for (segment, field) in segments.zip(fields) {
        body.push_str(field);
        body.push_str(segment);
    }

    format!("{HUMAN_TURN}{body}{ASSISTANT_TURN}")
}

/// Pulls `completion` out of the endpoint's response envelope.
pub fn extract_completion(envelope: &Value) -> Result<String, EvaluationError> {
    match envelope.get("completion") {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(other) => Err(EvaluationError::malformed(format!(
            "`completion` must be a string, got {}",
            json_type_name(other)
        ))),
        None => Err(EvaluationError::malformed("response envelope has no `completion` field")),
    }
}

/// The verdict is the completion's last non-empty line when it is a bare `Y` or `N`.
pub fn parse_verdict(completion: &str) -> Option<Verdict> {
    let last = completion
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())?;
    match last.trim() {
        "Y" => Some(Verdict::Yes),
        "N" => Some(Verdict::No),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
