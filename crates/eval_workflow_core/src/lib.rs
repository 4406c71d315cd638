//! Shared criteria-evaluation workflow domain primitives.
//!
//! This crate owns the workflow data contract: manifest parsing, the
//! evaluation prompt, result object layout and the error taxonomy. It
//! intentionally excludes AWS SDK and Lambda runtime concerns, which live in
//! `eval_workflow_lambda`.

pub mod contract;
pub mod error;
pub mod manifest;
pub mod prompt;
pub mod storage_keys;
