//! Capability boundaries between the workflow and external services.
//!
//! Handlers and the orchestrator only see these traits; the AWS SDK
//! implementations live in the lambda binaries.

pub mod inference;
pub mod invoke;
pub mod memory;
pub mod object_store;
