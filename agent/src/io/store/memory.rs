//! In-process task store with the same conditional-write semantics as the
//! production backend. Records every status each task takes.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow, bail};
use chrono::Utc;
use tracing::debug;

use super::{CasOutcome, TaskStore, TransitionGuard};
use crate::core::types::{Task, TaskResult, TaskStatus, TerminalStatus};

#[derive(Debug, Default)]
struct State {
    tasks: BTreeMap<String, Task>,
    history: HashMap<String, Vec<TaskStatus>>,
}

impl State {
    fn write(&mut self, id: &str, status: TaskStatus, result: Option<&TaskResult>) -> Option<Task> {
        let task = self.tasks.get_mut(id)?;
        task.status = status;
        task.updated_at = Some(Utc::now());
        if let Some(result) = result {
            task.result = Some(result.clone());
        }
        self.history.entry(id.to_string()).or_default().push(status);
        Some(task.clone())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    state: Mutex<State>,
    unreachable: AtomicBool,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a task as-is (its `updatedAt` is kept).
    pub fn insert(&self, task: Task) {
        let mut state = self.lock();
        state
            .history
            .insert(task.id.clone(), vec![task.status]);
        state.tasks.insert(task.id.clone(), task);
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.lock().tasks.get(id).cloned()
    }

    /// Every status the task has held, starting with its inserted status.
    pub fn status_history(&self, id: &str) -> Vec<TaskStatus> {
        self.lock().history.get(id).cloned().unwrap_or_default()
    }

    /// Make every call fail as if the store could not be reached.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            bail!("task store unreachable");
        }
        Ok(())
    }
}

impl TaskStore for MemoryTaskStore {
    fn find_pending(&self) -> Result<Option<String>> {
        self.ensure_reachable()?;
        let state = self.lock();
        Ok(state
            .tasks
            .values()
            .find(|task| task.status == TaskStatus::Pending)
            .map(|task| task.id.clone()))
    }

    fn transition(
        &self,
        id: &str,
        guard: &TransitionGuard,
        next: TaskStatus,
        result: Option<&TaskResult>,
    ) -> Result<CasOutcome> {
        self.ensure_reachable()?;
        if !guard.status.can_transition_to(next) {
            bail!("illegal transition {} -> {next}", guard.status);
        }
        let mut state = self.lock();
        let Some(current) = state.tasks.get(id) else {
            return Ok(CasOutcome::Missing);
        };
        let stale = guard
            .updated_at
            .is_some_and(|expected| current.updated_at != Some(expected));
        if current.status != guard.status || stale {
            debug!(task_id = id, observed = %current.status, "transition guard failed");
            return Ok(CasOutcome::Conflict(current.status));
        }
        let task = state
            .write(id, next, result)
            .ok_or_else(|| anyhow!("task {id} vanished under lock"))?;
        Ok(CasOutcome::Applied(task))
    }

    fn update_task_status(
        &self,
        id: &str,
        status: TerminalStatus,
        result: Option<&TaskResult>,
    ) -> Result<()> {
        self.ensure_reachable()?;
        self.lock()
            .write(id, status.into(), result)
            .ok_or_else(|| anyhow!("task {id} not found"))?;
        Ok(())
    }

    fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        self.ensure_reachable()?;
        Ok(self
            .lock()
            .tasks
            .values()
            .filter(|task| task.status == status)
            .cloned()
            .collect())
    }
}
