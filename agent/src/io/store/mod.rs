//! Task store client: exactly-once claims and terminal status reports.
//!
//! The [`TaskStore`] trait exposes a conditional read-then-write primitive
//! ([`TaskStore::transition`]); the claim protocol is built on top of it so
//! every backend shares one definition of "who won the race".

pub mod document;
pub mod firestore;
pub mod memory;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Task, TaskResult, TaskStatus, TerminalStatus};

pub use firestore::FirestoreTaskStore;
pub use memory::MemoryTaskStore;

/// What the record must still look like for a transition to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionGuard {
    pub status: TaskStatus,
    /// When set, `updatedAt` must also be unchanged.
    pub updated_at: Option<DateTime<Utc>>,
}

impl TransitionGuard {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status,
            updated_at: None,
        }
    }
}

/// Result of a conditional transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write applied; the task as it now stands.
    Applied(Task),
    /// Someone else changed the record first; its current status.
    Conflict(TaskStatus),
    /// The record no longer exists.
    Missing,
}

pub trait TaskStore: Send + Sync {
    /// Id of some `pending` task, if any. No ordering is promised.
    fn find_pending(&self) -> Result<Option<String>>;

    /// Atomically move `id` to `next` if it still matches `guard`, stamping `updatedAt`.
    fn transition(
        &self,
        id: &str,
        guard: &TransitionGuard,
        next: TaskStatus,
        result: Option<&TaskResult>,
    ) -> Result<CasOutcome>;

    /// Unconditional terminal write of status (and result, when given).
    fn update_task_status(
        &self,
        id: &str,
        status: TerminalStatus,
        result: Option<&TaskResult>,
    ) -> Result<()>;

    fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>>;

    /// Claim one pending task, or `None` when there is nothing to claim.
    ///
    /// A lost race or vanished record is not retried. Store errors are logged
    /// and reported as "no task".
    #[instrument(skip_all)]
    fn claim_pending_task(&self) -> Option<Task> {
        let id = match self.find_pending() {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!("no pending tasks");
                return None;
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "pending task query failed");
                return None;
            }
        };

        let guard = TransitionGuard::status(TaskStatus::Pending);
        match self.transition(&id, &guard, TaskStatus::InProgress, None) {
            Ok(CasOutcome::Applied(task)) => Some(task),
            Ok(CasOutcome::Conflict(observed)) => {
                info!(task_id = %id, observed = %observed, "task claimed elsewhere");
                None
            }
            Ok(CasOutcome::Missing) => {
                info!(task_id = %id, "task vanished before claim");
                None
            }
            Err(err) => {
                warn!(task_id = %id, err = %format!("{err:#}"), "claim transaction failed");
                None
            }
        }
    }
}
