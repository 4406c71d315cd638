pub mod trigger;
pub mod workflow;
