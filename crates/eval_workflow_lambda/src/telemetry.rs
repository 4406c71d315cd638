//! Structured logging for the lambdas.
//!
//! Events go to stdout as JSON lines so CloudWatch keeps the fields intact.
//! The level is controlled through `RUST_LOG` and defaults to `info`.

use eval_workflow_core::contract::{ExecutionState, ManifestRef};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. Safe to call more than once.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_current_span(true)
        .try_init();
}

pub fn execution_span(execution_id: &str, manifest: &ManifestRef) -> tracing::Span {
    tracing::info_span!(
        "workflow.execution",
        execution_id = %execution_id,
        manifest = %manifest,
    )
}

pub fn emit_state_transition(from: ExecutionState, to: ExecutionState) {
    info!(event = "execution.transition", from = %from, to = %to);
}

pub fn emit_item_succeeded(index: usize, attempts: u32, duration_ms: u128) {
    info!(
        event = "item.succeeded",
        item_index = index,
        attempts = attempts,
        duration_ms = duration_ms as u64,
    );
}

pub fn emit_item_failed(
    index: usize,
    error_code: &str,
    attempts: u32,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "item.failed",
        item_index = index,
        error_code = %error_code,
        attempts = attempts,
        error = %error,
    );
}

pub fn emit_execution_finished(
    status: ExecutionState,
    total_items: usize,
    succeeded: usize,
    failed: usize,
    duration_ms: u128,
) {
    info!(
        event = "execution.finished",
        status = %status,
        total_items = total_items,
        succeeded = succeeded,
        failed = failed,
        duration_ms = duration_ms as u64,
    );
}

pub fn emit_execution_error(error_code: &str, error: &dyn std::fmt::Display) {
    tracing::error!(event = "execution.error", error_code = %error_code, error = %error);
}
