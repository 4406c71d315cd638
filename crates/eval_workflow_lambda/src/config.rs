//! Environment-driven configuration for both lambdas.
//!
//! Every reader takes a lookup function so tests can supply variables without
//! touching the process environment.

use std::str::FromStr;
use std::time::Duration;

use eval_workflow_core::prompt::{
    GenerationParams, DEFAULT_MAX_TOKENS_TO_SAMPLE, DEFAULT_TEMPERATURE,
};

pub const DEFAULT_MODEL_ID: &str = "anthropic.claude-instant-v1";
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;
pub const DEFAULT_INVOCATION_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_BACKOFF_MS: u64 = 500;
pub const DEFAULT_RESULTS_PREFIX: &str = "output";
pub const DEFAULT_ABORT_GRACE_SECS: u64 = 30;
pub const DEFAULT_RESULT_WRITE_MARGIN_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be configured")]
    Missing { name: &'static str },

    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1`, doubling from the base.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(DEFAULT_RETRY_BASE_BACKOFF_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    pub model_id: String,
    pub generation: GenerationParams,
    pub max_concurrency: usize,
    pub invocation_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_items: Option<usize>,
    pub results_bucket: String,
    pub results_prefix: String,
    /// Time before the lambda deadline at which dispatch stops.
    pub abort_grace: Duration,
    /// Time before the lambda deadline reserved for writing results. Calls
    /// still in flight at that point are recorded as aborted.
    pub result_write_margin: Duration,
}

impl WorkflowConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let results_bucket = required(&lookup, "RESULTS_BUCKET")?;

        let temperature = parsed(&lookup, "TEMPERATURE", DEFAULT_TEMPERATURE)?;
        if !(0.0..=1.0).contains(&temperature) {
            return Err(invalid("TEMPERATURE", temperature, "must be within [0, 1]"));
        }

        let max_tokens_to_sample = positive(
            &lookup,
            "MAX_TOKENS_TO_SAMPLE",
            DEFAULT_MAX_TOKENS_TO_SAMPLE,
        )?;
        let max_concurrency = positive(&lookup, "MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY)?;
        let timeout_secs = positive(
            &lookup,
            "INVOCATION_TIMEOUT_SECS",
            DEFAULT_INVOCATION_TIMEOUT_SECS,
        )?;
        let max_attempts = positive(&lookup, "MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        let backoff_ms = parsed(
            &lookup,
            "RETRY_BASE_BACKOFF_MS",
            DEFAULT_RETRY_BASE_BACKOFF_MS,
        )?;

        let abort_grace_secs = positive(&lookup, "ABORT_GRACE_SECS", DEFAULT_ABORT_GRACE_SECS)?;
        let write_margin_secs = positive(
            &lookup,
            "RESULT_WRITE_MARGIN_SECS",
            DEFAULT_RESULT_WRITE_MARGIN_SECS,
        )?;
        if write_margin_secs >= abort_grace_secs {
            return Err(invalid(
                "RESULT_WRITE_MARGIN_SECS",
                write_margin_secs,
                format!("must be less than ABORT_GRACE_SECS ({abort_grace_secs})"),
            ));
        }

        let model_id = non_empty(&lookup, "MODEL_ID");
        let results_prefix = non_empty(&lookup, "RESULTS_PREFIX");

        Ok(Self {
            model_id: model_id.unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
            generation: GenerationParams {
                max_tokens_to_sample,
                temperature,
            },
            max_concurrency,
            invocation_timeout: Duration::from_secs(timeout_secs),
            retry: RetryPolicy {
                max_attempts,
                base_backoff: Duration::from_millis(backoff_ms),
            },
            max_items: optional(&lookup, "MAX_ITEMS")?,
            results_bucket,
            results_prefix: results_prefix.unwrap_or_else(|| DEFAULT_RESULTS_PREFIX.to_string()),
            abort_grace: Duration::from_secs(abort_grace_secs),
            result_write_margin: Duration::from_secs(write_margin_secs),
        })
    }

    /// How long in-flight calls may keep running once dispatch has stopped.
    pub fn drain_timeout(&self) -> Duration {
        self.abort_grace.saturating_sub(self.result_write_margin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerConfig {
    pub workflow_function_arn: String,
    pub filter: KeyFilter,
}

impl TriggerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            workflow_function_arn: required(&lookup, "WORKFLOW_FUNCTION_ARN")?,
            filter: KeyFilter {
                prefix: non_empty(&lookup, "MANIFEST_KEY_PREFIX"),
                suffix: non_empty(&lookup, "MANIFEST_KEY_SUFFIX"),
            },
        })
    }
}

/// Restricts which created objects start an execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFilter {
    pub prefix: Option<String>,
    pub suffix: Option<String>,
}

impl KeyFilter {
    pub fn matches(&self, key: &str) -> bool {
        let prefix_ok = self
            .prefix
            .as_deref()
            .map_or(true, |prefix| key.starts_with(prefix));
        let suffix_ok = self
            .suffix
            .as_deref()
            .map_or(true, |suffix| key.ends_with(suffix));
        prefix_ok && suffix_ok
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    non_empty(lookup, name).ok_or(ConfigError::Missing { name })
}

fn optional<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = non_empty(lookup, name) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|error| invalid(name, &raw, error))
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(optional(lookup, name)?.unwrap_or(default))
}

fn positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + Default + PartialEq + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    let value = parsed(lookup, name, default)?;
    if value == T::default() {
        return Err(invalid(name, value, "must be a positive integer"));
    }
    Ok(value)
}

fn invalid(
    name: &'static str,
    value: impl std::fmt::Display,
    reason: impl std::fmt::Display,
) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    fn workflow_config(pairs: &[(&str, &str)]) -> Result<WorkflowConfig, ConfigError> {
        let mut pairs = pairs.to_vec();
        pairs.push(("RESULTS_BUCKET", "results"));
        WorkflowConfig::from_lookup(lookup_from(&pairs))
    }

    #[test]
    fn workflow_config_applies_defaults() {
        let config = workflow_config(&[]).expect("config should load");

        assert_eq!(config.model_id, DEFAULT_MODEL_ID);
        assert_eq!(config.generation.max_tokens_to_sample, 1000);
        assert_eq!(config.generation.temperature, 1.0);
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.invocation_timeout, Duration::from_secs(60));
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.max_items, None);
        assert_eq!(config.results_bucket, "results");
        assert_eq!(config.results_prefix, "output");
        assert_eq!(config.abort_grace, Duration::from_secs(30));
        assert_eq!(config.result_write_margin, Duration::from_secs(10));
        assert_eq!(config.drain_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn workflow_config_reads_overrides() {
        let config = workflow_config(&[
            ("RESULTS_PREFIX", "evals/criteria"),
            ("MODEL_ID", "anthropic.claude-v2"),
            ("MAX_TOKENS_TO_SAMPLE", "300"),
            ("TEMPERATURE", "0.2"),
            ("MAX_CONCURRENCY", "4"),
            ("MAX_ITEMS", "25"),
            ("MAX_ATTEMPTS", "1"),
            ("ABORT_GRACE_SECS", "90"),
            ("RESULT_WRITE_MARGIN_SECS", "15"),
        ])
        .expect("config should load");

        assert_eq!(config.model_id, "anthropic.claude-v2");
        assert_eq!(config.generation.max_tokens_to_sample, 300);
        assert!((config.generation.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.max_items, Some(25));
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.results_prefix, "evals/criteria");
        assert_eq!(config.drain_timeout(), Duration::from_secs(75));
    }

    #[test]
    fn workflow_config_requires_results_bucket() {
        let error = WorkflowConfig::from_lookup(lookup_from(&[])).expect_err("should fail");
        assert_eq!(error.to_string(), "RESULTS_BUCKET must be configured");
    }

    #[test]
    fn workflow_config_rejects_zero_concurrency_and_bad_numbers() {
        let zero = workflow_config(&[("MAX_CONCURRENCY", "0")]).expect_err("should fail");
        assert!(zero.to_string().contains("MAX_CONCURRENCY"));

        let garbage = workflow_config(&[("TEMPERATURE", "hot")]).expect_err("should fail");
        assert_eq!(
            garbage,
            ConfigError::Invalid {
                name: "TEMPERATURE",
                value: "hot".to_string(),
                reason: "invalid float literal".to_string(),
            }
        );

        let out_of_range = workflow_config(&[("TEMPERATURE", "1.5")]).expect_err("should fail");
        assert!(out_of_range.to_string().contains("[0, 1]"));

        let max_items = workflow_config(&[("MAX_ITEMS", "-1")]).expect_err("should fail");
        assert!(max_items.to_string().contains("MAX_ITEMS"));
    }

    #[test]
    fn write_margin_must_leave_time_to_drain() {
        let error = workflow_config(&[
            ("ABORT_GRACE_SECS", "10"),
            ("RESULT_WRITE_MARGIN_SECS", "10"),
        ])
        .expect_err("should fail");

        assert!(error.to_string().contains("RESULT_WRITE_MARGIN_SECS"));
        assert!(error.to_string().contains("ABORT_GRACE_SECS (10)"));
    }

    #[test]
    fn trigger_config_reads_filters() {
        let config = TriggerConfig::from_lookup(lookup_from(&[
            ("WORKFLOW_FUNCTION_ARN", "arn:aws:lambda:eu-central-1:123:function:workflow"),
            ("MANIFEST_KEY_SUFFIX", ".json"),
        ]))
        .expect("config should load");

        assert_eq!(config.filter.prefix, None);
        assert!(config.filter.matches("batches/a.json"));
        assert!(!config.filter.matches("batches/a.csv"));
    }

    #[test]
    fn key_filter_requires_both_bounds() {
        let filter = KeyFilter {
            prefix: Some("manifests/".to_string()),
            suffix: Some(".json".to_string()),
        };
        assert!(filter.matches("manifests/run.json"));
        assert!(!filter.matches("inputs/run.json"));
        assert!(!filter.matches("manifests/run.txt"));
        assert!(KeyFilter::default().matches("anything"));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff_after(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(400));
    }
}
