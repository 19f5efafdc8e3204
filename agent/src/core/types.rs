//! Task model shared by the store adapters and the pipeline.
//!
//! Field names serialize in camelCase to match the task documents written by
//! the web front end (`updatedAt`, `branchName`, `commitHash`, `prUrl`).

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task record.
///
/// Transitions only move forward: `pending -> in_progress -> {completed | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Canonical storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// True when moving from `self` to `next` keeps the status sequence monotonic.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (
                    TaskStatus::InProgress,
                    TaskStatus::Completed | TaskStatus::Failed
                )
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(anyhow!("unknown task status '{other}'")),
        }
    }
}

/// Status written when the pipeline finishes with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Completed,
    Failed,
}

impl From<TerminalStatus> for TaskStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Completed => TaskStatus::Completed,
            TerminalStatus::Failed => TaskStatus::Failed,
        }
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        TaskStatus::from(*self).fmt(f)
    }
}

/// Result record attached to a task on its terminal transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub branch_name: String,
    pub commit_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A unit of requested code change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

impl Task {
    /// New pending task with no result.
    pub fn pending(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            status: TaskStatus::Pending,
            updated_at: None,
            result: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Description with surrounding whitespace removed, `None` when blank.
    pub fn description_text(&self) -> Option<&str> {
        self.description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

/// Transient result carried between workflow stages.
///
/// `success == false` short-circuits the pipeline; `error` may still be set on
/// success to carry a non-fatal warning (push or PR problems).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowOutcome {
    pub success: bool,
    pub branch_name: Option<String>,
    pub commit_hash: Option<String>,
    pub pr_url: Option<String>,
    pub error: Option<String>,
}

impl WorkflowOutcome {
    pub fn failed(branch_name: Option<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            branch_name,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Task result for the store, empty strings standing in for unknown values.
    pub fn to_result(&self) -> TaskResult {
        TaskResult {
            branch_name: self.branch_name.clone().unwrap_or_default(),
            commit_hash: self.commit_hash.clone().unwrap_or_default(),
            pr_url: self.pr_url.clone(),
            error: self.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotonic() {
        use TaskStatus::{Completed, Failed, InProgress, Pending};
        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!InProgress.can_transition_to(Pending));
        for terminal in [Completed, Failed] {
            assert!(terminal.is_terminal());
            for next in [Pending, InProgress, Completed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn status_parses_storage_strings() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().expect("parse"), status);
        }
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn task_serializes_with_camel_case_fields() {
        let mut task = Task::pending("t1", "Add logout button");
        task.status = TaskStatus::Completed;
        task.result = Some(TaskResult {
            branch_name: "task/t1".to_string(),
            commit_hash: "abc".to_string(),
            pr_url: None,
            error: None,
        });

        let value = serde_json::to_value(&task).expect("serialize");
        assert_eq!(value["status"], "completed");
        assert_eq!(value["result"]["branchName"], "task/t1");
        assert_eq!(value["result"]["commitHash"], "abc");
        assert!(value["result"].get("prUrl").is_none());
        assert!(value.get("updatedAt").is_some());
    }

    #[test]
    fn blank_description_is_ignored() {
        let task = Task::pending("t1", "title").with_description("   ");
        assert_eq!(task.description_text(), None);
    }

    #[test]
    fn outcome_result_fills_missing_values_with_empty_strings() {
        let outcome = WorkflowOutcome::failed(None, "boom");
        let result = outcome.to_result();
        assert_eq!(result.branch_name, "");
        assert_eq!(result.commit_hash, "");
        assert_eq!(result.error.as_deref(), Some("boom"));
    }
}
