//! Stable exit codes for task-agent CLI commands.

/// Command succeeded (for `once`: a task was claimed and processed).
pub const OK: i32 = 0;
/// Command failed due to invalid config, missing credentials or other errors.
pub const INVALID: i32 = 1;
/// `task-agent once` found no pending task.
pub const NO_TASK: i32 = 2;
