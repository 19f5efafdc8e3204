//! Polling task agent that turns queued change requests into pull requests.
//!
//! One task travels the whole pipeline at a time: it is claimed from the shared
//! store, a `task/<id>` branch is prepared, an external coding agent edits the
//! working copy, and the result is committed, pushed and reported back.
//!
//! - **[`core`]**: Pure logic (task model, naming, safety patterns, report mapping).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (task store, git, agent process, PR tool,
//!   config, prompt rendering).
//!
//! [`workflow`], [`orchestrator`], [`scheduler`] and [`recovery`] coordinate core
//! logic with I/O to implement the CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod recovery;
pub mod scheduler;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;
