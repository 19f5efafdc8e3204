//! Single-threaded polling loop with an adaptive, cancellable wait.
//!
//! After a poll that processed a task the scheduler waits only the short
//! backlog delay; after an empty (or failed) poll it waits the full interval.
//! [`SchedulerHandle::stop`] may be called from any thread: it cuts the
//! current wait short but never interrupts a poll in flight.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// Counters for one `start` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub polls: u64,
    pub tasks_processed: u64,
    pub errors: u64,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<SchedulerState>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop(&self) {
        let mut state = self.lock();
        if *state == SchedulerState::Stopped {
            info!("scheduler not running");
            return;
        }
        *state = SchedulerState::Stopped;
        self.wake.notify_all();
        info!("scheduler stopping");
    }
}

/// Cloneable stop handle (e.g. for a signal handler).
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn state(&self) -> SchedulerState {
        *self.shared.lock()
    }
}

#[derive(Debug)]
pub struct PollingScheduler {
    shared: Arc<Shared>,
    poll_interval: Duration,
    backlog_delay: Duration,
}

impl PollingScheduler {
    pub fn new(poll_interval: Duration, backlog_delay: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::Stopped),
                wake: Condvar::new(),
            }),
            poll_interval,
            backlog_delay,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.shared.lock()
    }

    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Poll until stopped.
    ///
    /// `poll` returns `Ok(true)` when it processed a task. Returns `None`
    /// without polling if the scheduler is already running.
    pub fn start<F>(&self, mut poll: F) -> Option<RunSummary>
    where
        F: FnMut() -> Result<bool>,
    {
        {
            let mut state = self.shared.lock();
            if *state == SchedulerState::Running {
                warn!("scheduler already running");
                return None;
            }
            *state = SchedulerState::Running;
        }
        info!(
            poll_interval_ms = self.poll_interval.as_millis(),
            backlog_delay_ms = self.backlog_delay.as_millis(),
            "starting polling"
        );

        let mut summary = RunSummary::default();
        loop {
            summary.polls += 1;
            let delay = match poll() {
                Ok(true) => {
                    summary.tasks_processed += 1;
                    self.backlog_delay
                }
                Ok(false) => self.poll_interval,
                Err(err) => {
                    summary.errors += 1;
                    error!(err = %format!("{err:#}"), "poll failed");
                    self.poll_interval
                }
            };

            let state = self.shared.lock();
            let (state, _) = self
                .shared
                .wake
                .wait_timeout_while(state, delay, |s| *s == SchedulerState::Running)
                .unwrap_or_else(PoisonError::into_inner);
            if *state != SchedulerState::Running {
                break;
            }
        }

        info!(
            polls = summary.polls,
            tasks_processed = summary.tasks_processed,
            errors = summary.errors,
            "polling stopped"
        );
        Some(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use anyhow::anyhow;

    use super::*;

    #[test]
    fn stop_cuts_the_idle_wait_short() {
        let scheduler = PollingScheduler::new(Duration::from_secs(60), Duration::from_secs(60));
        let handle = scheduler.handle();
        let started = Instant::now();

        let summary = thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(100));
                handle.stop();
            });
            scheduler.start(|| Ok(false))
        })
        .expect("summary");

        assert_eq!(summary.polls, 1);
        assert_eq!(summary.tasks_processed, 0);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[test]
    fn backlog_uses_short_delay() {
        let scheduler =
            PollingScheduler::new(Duration::from_secs(60), Duration::from_millis(10));
        let handle = scheduler.handle();
        let mut calls = 0;
        let started = Instant::now();

        let summary = scheduler
            .start(|| {
                calls += 1;
                if calls == 3 {
                    handle.stop();
                }
                Ok(true)
            })
            .expect("summary");

        assert_eq!(summary.polls, 3);
        assert_eq!(summary.tasks_processed, 3);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn poll_errors_are_counted_and_polling_continues() {
        let scheduler =
            PollingScheduler::new(Duration::from_millis(10), Duration::from_secs(60));
        let handle = scheduler.handle();
        let mut calls = 0;

        let summary = scheduler
            .start(|| {
                calls += 1;
                if calls < 3 {
                    return Err(anyhow!("store exploded"));
                }
                handle.stop();
                Ok(false)
            })
            .expect("summary");

        assert_eq!(summary.polls, 3);
        assert_eq!(summary.errors, 2);
    }

    #[test]
    fn second_start_is_refused_while_running() {
        let scheduler = PollingScheduler::new(Duration::from_millis(20), Duration::from_millis(20));
        let handle = scheduler.handle();

        thread::scope(|s| {
            let runner = s.spawn(|| scheduler.start(|| Ok(false)));
            while handle.state() != SchedulerState::Running {
                thread::sleep(Duration::from_millis(5));
            }
            assert_eq!(scheduler.start(|| Ok(false)), None);
            handle.stop();
            assert!(runner.join().expect("join").is_some());
        });
    }

    #[test]
    fn stop_before_start_is_a_no_op() {
        let scheduler = PollingScheduler::new(Duration::from_millis(10), Duration::from_millis(10));
        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }
}
