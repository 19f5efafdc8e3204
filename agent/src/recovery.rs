//! Startup sweep for tasks left `in_progress` by a crashed or killed agent.
//!
//! `updatedAt` acts as a lease: a task whose lease is older than the
//! threshold is failed through a guarded transition, so a task that another
//! agent touched in the meantime is left alone.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::core::types::{TaskResult, TaskStatus};
use crate::io::store::{CasOutcome, TaskStore, TransitionGuard};

/// Failure reason recorded on abandoned tasks.
pub fn abandoned_reason(stale_after: Duration) -> String {
    format!(
        "Abandoned: no outcome reported within {}s",
        stale_after.as_secs()
    )
}

/// Fail stale `in_progress` tasks. Returns the ids that were failed.
///
/// Tasks without `updatedAt` are skipped.
#[instrument(skip(store), fields(stale_after_secs = stale_after.as_secs()))]
pub fn recover_stale_tasks<S: TaskStore + ?Sized>(
    store: &S,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<String>> {
    let threshold = chrono::Duration::from_std(stale_after).context("stale threshold")?;
    let cutoff = now - threshold;
    let in_progress = store
        .list_by_status(TaskStatus::InProgress)
        .context("list in-progress tasks")?;

    let result = TaskResult {
        error: Some(abandoned_reason(stale_after)),
        ..TaskResult::default()
    };
    let mut recovered = Vec::new();
    for task in in_progress {
        let Some(updated_at) = task.updated_at else {
            warn!(task_id = %task.id, "in-progress task has no updatedAt, skipping");
            continue;
        };
        if updated_at >= cutoff {
            continue;
        }
        let guard = TransitionGuard {
            status: TaskStatus::InProgress,
            updated_at: Some(updated_at),
        };
        match store.transition(&task.id, &guard, TaskStatus::Failed, Some(&result))? {
            CasOutcome::Applied(_) => {
                info!(task_id = %task.id, %updated_at, "failed abandoned task");
                recovered.push(task.id);
            }
            CasOutcome::Conflict(observed) => {
                info!(task_id = %task.id, observed = %observed, "task moved on, not recovered");
            }
            CasOutcome::Missing => {}
        }
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Task;
    use crate::io::store::MemoryTaskStore;

    fn in_progress(id: &str, updated_at: Option<DateTime<Utc>>) -> Task {
        let mut task = Task::pending(id, "x");
        task.status = TaskStatus::InProgress;
        task.updated_at = updated_at;
        task
    }

    #[test]
    fn fails_only_stale_tasks() {
        let now = Utc::now();
        let store = MemoryTaskStore::new();
        store.insert(in_progress("old", Some(now - chrono::Duration::hours(3))));
        store.insert(in_progress("fresh", Some(now - chrono::Duration::minutes(5))));
        store.insert(in_progress("unknown", None));
        store.insert(Task::pending("queued", "y"));

        let recovered =
            recover_stale_tasks(&store, Duration::from_secs(3600), now).expect("sweep");
        assert_eq!(recovered, vec!["old".to_string()]);

        let old = store.get("old").expect("old");
        assert_eq!(old.status, TaskStatus::Failed);
        assert_eq!(
            old.result.and_then(|r| r.error).as_deref(),
            Some("Abandoned: no outcome reported within 3600s")
        );
        assert_eq!(
            store.status_history("old"),
            vec![TaskStatus::InProgress, TaskStatus::Failed]
        );
        assert_eq!(store.get("fresh").expect("fresh").status, TaskStatus::InProgress);
        assert_eq!(store.get("unknown").expect("unknown").status, TaskStatus::InProgress);
        assert_eq!(store.get("queued").expect("queued").status, TaskStatus::Pending);
    }

    #[test]
    fn unreachable_store_is_an_error() {
        let store = MemoryTaskStore::new();
        store.set_unreachable(true);
        assert!(recover_stale_tasks(&store, Duration::from_secs(60), Utc::now()).is_err());
    }
}
