//! Runs one execution: read the manifest, fan items out over a bounded worker
//! pool, then hand the aggregate to the result writer.
//!
//! The pool is a bounded `mpsc` work queue drained by `concurrency` worker
//! tasks. Workers share nothing mutable except the queue receiver; results
//! come back over a separate channel and are keyed by item index.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use eval_workflow_core::contract::{
    manifest_fingerprint, EvaluationResult, ExecutionError, ExecutionReport, ExecutionState,
    IndexedItem, ItemOutcome, ManifestRef, ResultLocation, ABORTED_ERROR_CODE,
};
use eval_workflow_core::error::{EvaluationError, ManifestError};
use eval_workflow_core::manifest::ManifestItems;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::RetryPolicy;
use crate::error::WorkflowError;
use crate::evaluator::Evaluator;
use crate::reader::BatchItemReader;
use crate::result_writer::{ResultBatch, ResultWriter};
use crate::telemetry;

const WORKER_LOST_ERROR_CODE: &str = "WorkerLost";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// How long in-flight calls may run after cancellation before they are
    /// dropped and recorded as aborted.
    pub drain_timeout: Duration,
}

pub struct Orchestrator {
    reader: BatchItemReader,
    evaluator: Arc<Evaluator>,
    writer: Arc<dyn ResultWriter>,
    settings: OrchestratorSettings,
}

struct ExecutionTracker {
    state: ExecutionState,
    history: Vec<ExecutionState>,
}

impl ExecutionTracker {
    fn new() -> Self {
        Self {
            state: ExecutionState::Pending,
            history: vec![ExecutionState::Pending],
        }
    }

    fn transition(&mut self, next: ExecutionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        telemetry::emit_state_transition(self.state, next);
        self.state = next;
        self.history.push(next);
    }
}

struct MappingOutcome {
    results: Vec<EvaluationResult>,
    aborted: bool,
}

impl Orchestrator {
    pub fn new(
        reader: BatchItemReader,
        evaluator: Arc<Evaluator>,
        writer: Arc<dyn ResultWriter>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            reader,
            evaluator,
            writer,
            settings: OrchestratorSettings {
                concurrency: settings.concurrency.max(1),
                retry: RetryPolicy {
                    max_attempts: settings.retry.max_attempts.max(1),
                    ..settings.retry
                },
                drain_timeout: settings.drain_timeout,
            },
        }
    }

    /// Always returns a report; fatal errors are carried in `report.error`
    /// with `status == Failed`.
    pub async fn run(
        &self,
        execution_id: &str,
        manifest: &ManifestRef,
        cancel: CancellationToken,
    ) -> ExecutionReport {
        let span = telemetry::execution_span(execution_id, manifest);
        self.run_inner(execution_id, manifest, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        execution_id: &str,
        manifest: &ManifestRef,
        cancel: CancellationToken,
    ) -> ExecutionReport {
        let started_at = Instant::now();
        let mut tracker = ExecutionTracker::new();
        let mut report = ExecutionReport {
            execution_id: execution_id.to_string(),
            manifest: manifest.clone(),
            status: ExecutionState::Pending,
            state_history: Vec::new(),
            total_items: 0,
            succeeded: 0,
            failed: 0,
            manifest_fingerprint: None,
            result_location: None,
            error: None,
        };

        tracker.transition(ExecutionState::Reading);
        let items = match self.read(manifest).await {
            Ok(items) => items,
            Err(error) => {
                tracker.transition(ExecutionState::Failed);
                return finish_failed(report, tracker, &WorkflowError::from(error), started_at);
            }
        };
        let fingerprint = manifest_fingerprint(items.body());
        report.manifest_fingerprint = Some(fingerprint.clone());

        tracker.transition(ExecutionState::Mapping);
        let mapping = match self.map_items(items, &cancel).await {
            Ok(mapping) => mapping,
            Err(error) => {
                // Unreachable once validation passed; the reader is deterministic.
                tracker.transition(ExecutionState::Collecting);
                tracker.transition(ExecutionState::Failed);
                return finish_failed(report, tracker, &WorkflowError::from(error), started_at);
            }
        };

        tracker.transition(ExecutionState::Collecting);
        let mut results = mapping.results;
        results.sort_by_key(|result| result.index);
        report.total_items = results.len();
        report.succeeded = results.iter().filter(|result| result.is_success()).count();
        report.failed = report.total_items - report.succeeded;

        let intended = if mapping.aborted {
            ExecutionState::Aborted
        } else {
            ExecutionState::Succeeded
        };
        let event_time = chrono::Utc::now().to_rfc3339();
        match self
            .write(ResultBatch {
                execution_id,
                manifest,
                manifest_fingerprint: &fingerprint,
                status: intended,
                event_time: &event_time,
                results: &results,
            })
            .await
        {
            Ok(location) => {
                report.result_location = Some(location);
                tracker.transition(intended);
                finish(report, tracker, started_at)
            }
            Err(error) => {
                tracker.transition(ExecutionState::Failed);
                finish_failed(report, tracker, &error, started_at)
            }
        }
    }

    async fn read(&self, manifest: &ManifestRef) -> Result<ManifestItems, ManifestError> {
        let items = self.reader.open(manifest).await?;
        let count = items.validate()?;
        tracing::info!(event = "manifest.read", item_count = count, format = ?items.format());
        Ok(items)
    }

    async fn write(&self, batch: ResultBatch<'_>) -> Result<ResultLocation, WorkflowError> {
        Ok(self.writer.write_results(batch).await?)
    }

    async fn map_items(
        &self,
        mut items: ManifestItems,
        cancel: &CancellationToken,
    ) -> Result<MappingOutcome, ManifestError> {
        items.restart();
        // A child token lets a late read error stop the pool without
        // cancelling the caller's token.
        let cancel = cancel.child_token();
        let concurrency = self.settings.concurrency;
        let (work_tx, work_rx) = mpsc::channel::<IndexedItem>(concurrency);
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<EvaluationResult>();

        let workers: Vec<_> = (0..concurrency)
            .map(|worker_id| {
                let queue = Arc::clone(&work_rx);
                let results = result_tx.clone();
                let evaluator = Arc::clone(&self.evaluator);
                let retry = self.settings.retry;
                let cancel = cancel.clone();
                tokio::spawn(
                    worker_loop(queue, results, evaluator, retry, cancel)
                        .instrument(tracing::debug_span!("worker", worker_id)),
                )
            })
            .collect();
        drop(result_tx);
        drop(work_rx);

        let mut pending: BTreeMap<usize, IndexedItem> = BTreeMap::new();
        let mut collected: Vec<EvaluationResult> = Vec::new();
        let mut aborted = false;
        let mut read_error = None;

        for entry in items {
            let indexed = match entry {
                Ok(indexed) => indexed,
                Err(error) => {
                    read_error = Some(error);
                    cancel.cancel();
                    break;
                }
            };

            if cancel.is_cancelled() {
                aborted = true;
                collected.push(EvaluationResult::aborted(indexed));
                continue;
            }

            let dispatched = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                sent = work_tx.send(indexed.clone()) => Some(sent.is_ok()),
            };
            match dispatched {
                Some(true) => {
                    pending.insert(indexed.index, indexed);
                }
                // Every worker has exited; nothing will drain the queue.
                Some(false) => collected.push(worker_lost(indexed)),
                None => {
                    aborted = true;
                    collected.push(EvaluationResult::aborted(indexed));
                }
            }

            while let Ok(result) = result_rx.try_recv() {
                pending.remove(&result.index);
                collected.push(result);
            }
        }
        drop(work_tx);

        let drain_deadline = async {
            cancel.cancelled().await;
            tokio::time::sleep(self.settings.drain_timeout).await;
        };
        tokio::pin!(drain_deadline);
        let mut drained = true;
        loop {
            tokio::select! {
                biased;
                received = result_rx.recv() => match received {
                    Some(result) => {
                        pending.remove(&result.index);
                        collected.push(result);
                    }
                    None => break,
                },
                _ = &mut drain_deadline => {
                    drained = false;
                    break;
                }
            }
        }

        if !drained {
            tracing::warn!(
                event = "mapping.drain_timeout",
                in_flight = pending.len(),
                drain_timeout_ms = self.settings.drain_timeout.as_millis() as u64,
            );
            for worker in &workers {
                worker.abort();
            }
        }

        for outcome in futures::future::join_all(workers).await {
            // Aborted workers report cancellation; only a panic is unexpected.
            if let Err(error) = outcome {
                if error.is_panic() {
                    tracing::error!(event = "worker.lost", error = %error);
                }
            }
        }
        while let Ok(result) = result_rx.try_recv() {
            pending.remove(&result.index);
            collected.push(result);
        }

        // Items still pending were either cut off by the drain timeout or
        // held by a worker that panicked.
        if drained {
            collected.extend(pending.into_values().map(worker_lost));
        } else {
            aborted = true;
            collected.extend(pending.into_values().map(interrupted));
        }

        if let Some(error) = read_error {
            return Err(error);
        }

        aborted = aborted
            || collected.iter().any(|result| {
                matches!(
                    &result.outcome,
                    ItemOutcome::Failed { error_code, .. }
                        if error_code == ABORTED_ERROR_CODE
                )
            });

        Ok(MappingOutcome {
            results: collected,
            aborted,
        })
    }
}

async fn worker_loop(
    queue: Arc<Mutex<mpsc::Receiver<IndexedItem>>>,
    results: mpsc::UnboundedSender<EvaluationResult>,
    evaluator: Arc<Evaluator>,
    retry: RetryPolicy,
    cancel: CancellationToken,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(indexed) = next else {
            break;
        };

        let result = if cancel.is_cancelled() {
            EvaluationResult::aborted(indexed)
        } else {
            evaluate_with_retry(&evaluator, indexed, retry, &cancel).await
        };

        if results.send(result).is_err() {
            break;
        }
    }
}

/// Runs the evaluation task, retrying endpoint failures with exponential
/// backoff. Cancellation skips remaining retries; a call already in flight is
/// only dropped when the drain timeout expires.
pub async fn evaluate_with_retry(
    evaluator: &Evaluator,
    indexed: IndexedItem,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> EvaluationResult {
    let started_at = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match evaluator.evaluate(&indexed.item).await {
            Ok(evaluation) => {
                telemetry::emit_item_succeeded(
                    indexed.index,
                    attempt,
                    started_at.elapsed().as_millis(),
                );
                return EvaluationResult {
                    index: indexed.index,
                    item: indexed.item,
                    outcome: ItemOutcome::Succeeded {
                        output: evaluation.output,
                        verdict: evaluation.verdict,
                        attempts: attempt,
                    },
                };
            }
            Err(error) => {
                let exhausted = attempt >= retry.max_attempts;
                if !error.is_retryable() || exhausted || cancel.is_cancelled() {
                    return give_up(indexed, &error, attempt);
                }

                let delay = retry.backoff_after(attempt);
                tracing::debug!(
                    event = "item.retry",
                    item_index = indexed.index,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                );
                let cancelled = tokio::select! {
                    _ = cancel.cancelled() => true,
                    _ = tokio::time::sleep(delay) => false,
                };
                if cancelled {
                    return give_up(indexed, &error, attempt);
                }
            }
        }
    }
}

fn give_up(indexed: IndexedItem, error: &EvaluationError, attempts: u32) -> EvaluationResult {
    telemetry::emit_item_failed(indexed.index, error.error_code(), attempts, error);
    EvaluationResult::failed(indexed, error, attempts)
}

fn interrupted(indexed: IndexedItem) -> EvaluationResult {
    let message = "execution aborted before the item finished";
    telemetry::emit_item_failed(indexed.index, ABORTED_ERROR_CODE, 0, &message);
    EvaluationResult {
        index: indexed.index,
        item: indexed.item,
        outcome: ItemOutcome::Failed {
            error_code: ABORTED_ERROR_CODE.to_string(),
            error_message: message.to_string(),
            attempts: 0,
        },
    }
}

fn worker_lost(indexed: IndexedItem) -> EvaluationResult {
    let message = "worker stopped before recording a result";
    telemetry::emit_item_failed(indexed.index, WORKER_LOST_ERROR_CODE, 0, &message);
    EvaluationResult {
        index: indexed.index,
        item: indexed.item,
        outcome: ItemOutcome::Failed {
            error_code: WORKER_LOST_ERROR_CODE.to_string(),
            error_message: message.to_string(),
            attempts: 0,
        },
    }
}

fn finish(
    mut report: ExecutionReport,
    tracker: ExecutionTracker,
    started_at: Instant,
) -> ExecutionReport {
    debug_assert!(tracker.state.is_terminal(), "finished in {}", tracker.state);
    report.status = tracker.state;
    report.state_history = tracker.history;
    telemetry::emit_execution_finished(
        report.status,
        report.total_items,
        report.succeeded,
        report.failed,
        started_at.elapsed().as_millis(),
    );
    report
}

fn finish_failed(
    mut report: ExecutionReport,
    tracker: ExecutionTracker,
    error: &WorkflowError,
    started_at: Instant,
) -> ExecutionReport {
    telemetry::emit_execution_error(error.error_code(), error);
    report.error = Some(ExecutionError {
        error_code: error.error_code().to_string(),
        error_message: error.to_string(),
    });
    finish(report, tracker, started_at)
}
