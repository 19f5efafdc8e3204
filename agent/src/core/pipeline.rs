//! Pipeline stages, failure taxonomy and the store report each outcome maps to.
//!
//! The orchestrator owns the I/O; this module decides what gets written to the
//! store for every way a task can end, so the fatal-vs-warning policy can be
//! read (and tested) in one place.

use thiserror::Error;

use super::types::{TaskResult, TerminalStatus, WorkflowOutcome};

/// Position of a claimed task in the pipeline.
///
/// `Claimed -> BranchSetup -> AgentExecution -> Finalization`, then the report
/// is written. There are no backward edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Claimed,
    BranchSetup,
    AgentExecution { branch_name: String },
    Finalization { branch_name: String },
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Claimed => "claimed",
            Stage::BranchSetup => "branch_setup",
            Stage::AgentExecution { .. } => "agent_execution",
            Stage::Finalization { .. } => "finalization",
        }
    }
}

/// Result of one stage transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Next(Stage),
    Done(Report),
}

/// Conditions that are fatal to a task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskFailure {
    #[error("{0}")]
    Rejected(String),

    #[error("Failed to checkout default branch: {0}")]
    Checkout(String),

    #[error("Failed to create branch: {0}")]
    CreateBranch(String),

    #[error("{0}")]
    Execution(String),

    #[error("No changes were made by the agent")]
    NoChanges,

    #[error("Failed to stage changes: {0}")]
    Stage(String),

    #[error("Failed to commit: {0}")]
    Commit(String),

    #[error("{0}")]
    Unexpected(String),
}

/// Degraded but successful outcomes; the task is still `completed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskWarning {
    #[error("Changes committed locally but push failed")]
    PushFailed,

    #[error("Pull request creation failed: {0}")]
    PullRequestFailed(String),
}

/// Terminal status plus result, ready to be written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub status: TerminalStatus,
    pub result: TaskResult,
}

impl Report {
    /// Safety rejection: nothing was touched.
    pub fn rejected(reason: &str) -> Self {
        Self::failed(String::new(), String::new(), TaskFailure::Rejected(reason.to_string()))
    }

    /// Branch setup failed; the branch name may be empty.
    pub fn setup_failed(outcome: &WorkflowOutcome) -> Self {
        let mut result = outcome.to_result();
        result.commit_hash = String::new();
        Self {
            status: TerminalStatus::Failed,
            result,
        }
    }

    /// Agent failed; the branch is kept so a human can inspect it.
    pub fn execution_failed(branch_name: &str, error: &str) -> Self {
        Self::failed(
            branch_name.to_string(),
            String::new(),
            TaskFailure::Execution(error.to_string()),
        )
    }

    /// Finalization result, success or failure, with whatever it produced.
    pub fn finalized(outcome: &WorkflowOutcome) -> Self {
        let status = if outcome.success {
            TerminalStatus::Completed
        } else {
            TerminalStatus::Failed
        };
        Self {
            status,
            result: outcome.to_result(),
        }
    }

    /// Anything not anticipated by the other reports.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::failed(
            String::new(),
            String::new(),
            TaskFailure::Unexpected(message.into()),
        )
    }

    fn failed(branch_name: String, commit_hash: String, failure: TaskFailure) -> Self {
        Self {
            status: TerminalStatus::Failed,
            result: TaskResult {
                branch_name,
                commit_hash,
                pr_url: None,
                error: Some(failure.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reasons_are_stable() {
        assert_eq!(
            TaskFailure::NoChanges.to_string(),
            "No changes were made by the agent"
        );
        assert_eq!(
            TaskFailure::Checkout("dirty".to_string()).to_string(),
            "Failed to checkout default branch: dirty"
        );
        assert_eq!(
            TaskWarning::PushFailed.to_string(),
            "Changes committed locally but push failed"
        );
    }

    #[test]
    fn setup_failure_has_empty_commit_hash() {
        let mut outcome = WorkflowOutcome::failed(None, "Failed to create branch: nope");
        outcome.commit_hash = Some("deadbeef".to_string());
        let report = Report::setup_failed(&outcome);
        assert_eq!(report.status, TerminalStatus::Failed);
        assert_eq!(report.result.branch_name, "");
        assert_eq!(report.result.commit_hash, "");
        assert_eq!(
            report.result.error.as_deref(),
            Some("Failed to create branch: nope")
        );
    }

    #[test]
    fn execution_failure_keeps_branch_and_raw_error() {
        let report = Report::execution_failed("task/t1", "boom on stderr");
        assert_eq!(report.status, TerminalStatus::Failed);
        assert_eq!(report.result.branch_name, "task/t1");
        assert_eq!(report.result.commit_hash, "");
        assert_eq!(report.result.error.as_deref(), Some("boom on stderr"));
    }

    #[test]
    fn successful_finalization_with_warning_is_completed() {
        let outcome = WorkflowOutcome {
            success: true,
            branch_name: Some("task/t1".to_string()),
            commit_hash: Some("a".repeat(40)),
            pr_url: None,
            error: Some(TaskWarning::PushFailed.to_string()),
        };
        let report = Report::finalized(&outcome);
        assert_eq!(report.status, TerminalStatus::Completed);
        assert_eq!(report.result.commit_hash.len(), 40);
        assert!(report.result.error.is_some());
    }

    #[test]
    fn failed_finalization_keeps_partial_result() {
        let mut outcome = WorkflowOutcome::failed(Some("task/t1".to_string()), "Failed to commit: x");
        outcome.commit_hash = None;
        let report = Report::finalized(&outcome);
        assert_eq!(report.status, TerminalStatus::Failed);
        assert_eq!(report.result.branch_name, "task/t1");
    }

    #[test]
    fn unexpected_failure_is_bare() {
        let report = Report::unexpected("template exploded");
        assert_eq!(report.result.branch_name, "");
        assert_eq!(report.result.commit_hash, "");
        assert_eq!(report.result.error.as_deref(), Some("template exploded"));
    }
}
