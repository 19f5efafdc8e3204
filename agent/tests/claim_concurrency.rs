//! Exactly-once claiming under concurrent claimers.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use task_agent::core::types::{Task, TaskStatus};
use task_agent::io::store::{MemoryTaskStore, TaskStore};

#[test]
fn one_pending_task_is_claimed_exactly_once() {
    const CLAIMERS: usize = 16;
    let store = Arc::new(MemoryTaskStore::new());
    store.insert(Task::pending("t1", "Add logout button"));
    let barrier = Arc::new(Barrier::new(CLAIMERS));

    let handles: Vec<_> = (0..CLAIMERS)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.claim_pending_task()
            })
        })
        .collect();

    let claimed: Vec<Task> = handles
        .into_iter()
        .filter_map(|h| h.join().expect("join"))
        .collect();

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, "t1");
    assert_eq!(
        store.status_history("t1"),
        vec![TaskStatus::Pending, TaskStatus::InProgress]
    );
}

#[test]
fn many_tasks_are_each_claimed_once() {
    const TASKS: usize = 20;
    const CLAIMERS: usize = 8;
    let store = Arc::new(MemoryTaskStore::new());
    for i in 0..TASKS {
        store.insert(Task::pending(format!("t{i:02}"), format!("task {i}")));
    }
    let barrier = Arc::new(Barrier::new(CLAIMERS));

    let handles: Vec<_> = (0..CLAIMERS)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut mine = Vec::new();
                // A lost race returns None even while work remains, so keep
                // going until the queue is really empty.
                while !store
                    .list_by_status(TaskStatus::Pending)
                    .expect("list")
                    .is_empty()
                {
                    if let Some(task) = store.claim_pending_task() {
                        mine.push(task.id);
                    }
                }
                mine
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.join().expect("join"));
    }
    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), TASKS);
    assert_eq!(unique.len(), TASKS);
    for id in unique {
        assert_eq!(
            store.status_history(&id),
            vec![TaskStatus::Pending, TaskStatus::InProgress]
        );
    }
}
