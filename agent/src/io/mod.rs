//! Side-effecting adapters used by the pipeline.

pub mod agent;
pub mod config;
pub mod git;
pub mod process;
pub mod prompt;
pub mod pull_request;
pub mod store;
