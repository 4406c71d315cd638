//! Lambda-facing side of the batch evaluation workflow.
//!
//! `eval_workflow_core` owns the data contract, manifest parsing and prompt
//! construction. This crate adds the capability traits for storage, inference
//! and execution start, the bounded-concurrency orchestrator, and the two
//! Lambda handlers: the S3 trigger and the workflow execution itself.

pub mod adapters;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod handlers;
pub mod orchestrator;
pub mod reader;
pub mod result_writer;
pub mod telemetry;
