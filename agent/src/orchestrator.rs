//! One task through the pipeline: claim, branch setup, agent run, finalize, report.
//!
//! The pipeline is a small state machine ([`Stage`]) with one transition
//! function per stage. Every path ends in exactly one terminal store write;
//! only a failure of that write is returned to the caller. A panic inside a
//! stage is reported as a failed task.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::pipeline::{Report, Stage, Transition};
use crate::core::safety::validate_task_safety;
use crate::core::types::Task;
use crate::io::agent::{AgentRequest, AgentRunner};
use crate::io::config::AgentConfig;
use crate::io::git::Git;
use crate::io::prompt::render_task_prompt;
use crate::io::pull_request::PullRequestCreator;
use crate::io::store::TaskStore;
use crate::workflow::VersionControlWorkflow;

/// Behavior switches taken from the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub validate_safety: bool,
    pub prepend_rules: bool,
    pub pull_requests: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            validate_safety: true,
            prepend_rules: true,
            pull_requests: true,
        }
    }
}

impl From<&AgentConfig> for PipelineSettings {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            validate_safety: cfg.safety.validate,
            prepend_rules: cfg.safety.prepend_rules,
            pull_requests: cfg.pull_request.enabled,
        }
    }
}

pub struct Pipeline<'a, S: ?Sized, A, P> {
    store: &'a S,
    git: &'a Git,
    agent: &'a A,
    pull_requests: &'a P,
    settings: PipelineSettings,
}

impl<'a, S, A, P> Pipeline<'a, S, A, P>
where
    S: TaskStore + ?Sized,
    A: AgentRunner,
    P: PullRequestCreator,
{
    pub fn new(
        store: &'a S,
        git: &'a Git,
        agent: &'a A,
        pull_requests: &'a P,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            git,
            agent,
            pull_requests,
            settings,
        }
    }

    /// Claim and fully process at most one task.
    ///
    /// Returns `Ok(true)` when a task was processed (whatever its outcome) and
    /// `Ok(false)` when none was available.
    #[instrument(skip_all)]
    pub fn process_next_task(&self) -> Result<bool> {
        info!("checking for pending tasks");
        let Some(task) = self.store.claim_pending_task() else {
            info!("no pending tasks found");
            return Ok(false);
        };
        info!(task_id = %task.id, title = %task.title, "claimed task");

        let report = panic::catch_unwind(AssertUnwindSafe(|| self.handle_task(&task)))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                warn!(task_id = %task.id, err = %message, "task pipeline panicked");
                Report::unexpected(message)
            });
        self.store
            .update_task_status(&task.id, report.status, Some(&report.result))
            .with_context(|| format!("report {} for task {}", report.status, task.id))?;
        info!(task_id = %task.id, status = %report.status, "task status reported");
        Ok(true)
    }

    /// Drive a claimed task to its terminal report.
    pub fn handle_task(&self, task: &Task) -> Report {
        let mut stage = Stage::Claimed;
        loop {
            let transition = match &stage {
                Stage::Claimed => self.on_claimed(task),
                Stage::BranchSetup => self.on_branch_setup(task),
                Stage::AgentExecution { branch_name } => self.on_agent_execution(task, branch_name),
                Stage::Finalization { branch_name } => self.on_finalization(task, branch_name),
            };
            match transition {
                Transition::Next(next) => stage = next,
                Transition::Done(report) => return report,
            }
        }
    }

    fn on_claimed(&self, task: &Task) -> Transition {
        if self.settings.validate_safety
            && let Some(reason) = validate_task_safety(&task.title, task.description_text())
        {
            warn!(task_id = %task.id, reason, "task rejected by safety check");
            return Transition::Done(Report::rejected(reason));
        }
        Transition::Next(Stage::BranchSetup)
    }

    fn on_branch_setup(&self, task: &Task) -> Transition {
        let outcome = self.workflow().setup(&task.id);
        match outcome.branch_name.clone() {
            Some(branch_name) if outcome.success => {
                info!(branch = %branch_name, "created branch");
                Transition::Next(Stage::AgentExecution { branch_name })
            }
            _ => {
                warn!(err = outcome.error.as_deref().unwrap_or_default(), "git setup failed");
                Transition::Done(Report::setup_failed(&outcome))
            }
        }
    }

    fn on_agent_execution(&self, task: &Task, branch_name: &str) -> Transition {
        let prompt = match render_task_prompt(task, self.settings.prepend_rules) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "prompt rendering failed");
                return Transition::Done(Report::unexpected(format!("{err:#}")));
            }
        };
        let result = self.agent.run(&AgentRequest {
            prompt: &prompt,
            workdir: self.git.workdir(),
        });
        if !result.success {
            warn!(err = result.error_text(), "task execution failed");
            return Transition::Done(Report::execution_failed(branch_name, result.error_text()));
        }
        info!("task execution completed");
        Transition::Next(Stage::Finalization {
            branch_name: branch_name.to_string(),
        })
    }

    fn on_finalization(&self, task: &Task, branch_name: &str) -> Transition {
        let outcome = self.workflow().finalize(&task.id, &task.title, branch_name);
        if outcome.success {
            info!(
                branch = outcome.branch_name.as_deref().unwrap_or_default(),
                commit = outcome.commit_hash.as_deref().unwrap_or_default(),
                pr_url = outcome.pr_url.as_deref().unwrap_or_default(),
                warning = outcome.error.as_deref().unwrap_or_default(),
                "git workflow completed"
            );
        } else {
            warn!(err = outcome.error.as_deref().unwrap_or_default(), "git finalization failed");
        }
        Transition::Done(Report::finalized(&outcome))
    }

    fn workflow(&self) -> VersionControlWorkflow<'a, P> {
        let pull_requests = self.settings.pull_requests.then_some(self.pull_requests);
        VersionControlWorkflow::new(self.git, pull_requests)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload");
    format!("Task pipeline panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{TaskStatus, TerminalStatus};
    use crate::io::store::MemoryTaskStore;
    use crate::test_support::{ScriptedAgent, ScriptedPullRequests, TestRepo};

    #[test]
    fn empty_queue_returns_false() {
        let repo = TestRepo::with_origin("main");
        let git = repo.git();
        let store = MemoryTaskStore::new();
        let agent = ScriptedAgent::writing("a.txt", "a\n");
        let prs = ScriptedPullRequests::succeeding("https://github.com/acme/app/pull/1");
        let pipeline = Pipeline::new(&store, &git, &agent, &prs, PipelineSettings::default());
        assert!(!pipeline.process_next_task().expect("poll"));
        assert!(agent.prompts().is_empty());
    }

    #[test]
    fn unsafe_task_never_reaches_the_agent() {
        let repo = TestRepo::with_origin("main");
        let git = repo.git();
        let store = MemoryTaskStore::new();
        store.insert(Task::pending("t1", "Print the admin password in the footer"));
        let agent = ScriptedAgent::writing("a.txt", "a\n");
        let prs = ScriptedPullRequests::succeeding("https://github.com/acme/app/pull/1");
        let pipeline = Pipeline::new(&store, &git, &agent, &prs, PipelineSettings::default());

        assert!(pipeline.process_next_task().expect("poll"));
        let task = store.get("t1").expect("task");
        assert_eq!(task.status, TaskStatus::Failed);
        let result = task.result.expect("result");
        assert_eq!(result.branch_name, "");
        assert_eq!(
            result.error.as_deref(),
            Some("Requests involving secrets or credentials are not allowed")
        );
        assert!(agent.prompts().is_empty());
        assert_eq!(repo.current_branch(), "main");
    }

    #[test]
    fn safety_check_can_be_disabled() {
        let repo = TestRepo::with_origin("main");
        let git = repo.git();
        let agent = ScriptedAgent::writing("token.txt", "design token\n");
        let prs = ScriptedPullRequests::succeeding("https://github.com/acme/app/pull/1");
        let store = MemoryTaskStore::new();
        let settings = PipelineSettings {
            validate_safety: false,
            ..PipelineSettings::default()
        };
        let pipeline = Pipeline::new(&store, &git, &agent, &prs, settings);
        let report = pipeline.handle_task(&Task::pending("t1", "Rename the color token"));
        assert_eq!(report.status, TerminalStatus::Completed);
    }

    #[test]
    fn prompt_carries_rules_and_description() {
        let repo = TestRepo::with_origin("main");
        let git = repo.git();
        let agent = ScriptedAgent::writing("a.txt", "a\n");
        let prs = ScriptedPullRequests::succeeding("https://github.com/acme/app/pull/1");
        let store = MemoryTaskStore::new();
        let pipeline = Pipeline::new(&store, &git, &agent, &prs, PipelineSettings::default());

        let task = Task::pending("t1", "Add logout button").with_description("Top right corner");
        let report = pipeline.handle_task(&task);
        assert_eq!(report.status, TerminalStatus::Completed);

        let prompts = agent.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("## Safety rules"));
        assert!(prompts[0].ends_with("Add logout button\n\nAdditional instructions: Top right corner"));
    }

    #[test]
    fn disabled_pull_requests_stop_after_push() {
        let repo = TestRepo::with_origin("main");
        let git = repo.git();
        let agent = ScriptedAgent::writing("a.txt", "a\n");
        let prs = ScriptedPullRequests::succeeding("https://github.com/acme/app/pull/1");
        let store = MemoryTaskStore::new();
        let settings = PipelineSettings {
            pull_requests: false,
            ..PipelineSettings::default()
        };
        let pipeline = Pipeline::new(&store, &git, &agent, &prs, settings);

        let report = pipeline.handle_task(&Task::pending("t1", "Add a"));
        assert_eq!(report.status, TerminalStatus::Completed);
        assert_eq!(report.result.pr_url, None);
        assert!(prs.requests().is_empty());
        assert!(repo.origin_has_branch("task/t1"));
    }

    struct PanickingAgent;

    impl AgentRunner for PanickingAgent {
        fn run(&self, _request: &AgentRequest<'_>) -> crate::io::process::CommandResult {
            panic!("agent exploded");
        }
    }

    #[test]
    fn panicking_agent_still_reports_failure() {
        let repo = TestRepo::with_origin("main");
        let git = repo.git();
        let store = MemoryTaskStore::new();
        store.insert(Task::pending("t1", "Add a"));
        let prs = ScriptedPullRequests::succeeding("https://github.com/acme/app/pull/1");
        let settings = PipelineSettings::default();
        let pipeline = Pipeline::new(&store, &git, &PanickingAgent, &prs, settings);

        assert!(pipeline.process_next_task().expect("poll"));
        let task = store.get("t1").expect("task");
        assert_eq!(task.status, TaskStatus::Failed);
        let result = task.result.expect("result");
        assert_eq!(
            result.error.as_deref(),
            Some("Task pipeline panicked: agent exploded")
        );
        assert_eq!(result.commit_hash, "");
        assert_eq!(
            store.status_history("t1"),
            vec![TaskStatus::Pending, TaskStatus::InProgress, TaskStatus::Failed]
        );
        assert!(prs.requests().is_empty());
    }

    #[test]
    fn panic_messages_from_formatted_panics() {
        let payload: Box<dyn Any + Send> = Box::new(format!("index {} out of range", 3));
        assert_eq!(
            panic_message(payload.as_ref()),
            "Task pipeline panicked: index 3 out of range"
        );
        let opaque: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(
            panic_message(opaque.as_ref()),
            "Task pipeline panicked: unknown panic payload"
        );
    }

    struct ReportsFail(MemoryTaskStore);

    impl TaskStore for ReportsFail {
        fn find_pending(&self) -> Result<Option<String>> {
            self.0.find_pending()
        }

        fn transition(
            &self,
            id: &str,
            guard: &crate::io::store::TransitionGuard,
            next: TaskStatus,
            result: Option<&crate::core::types::TaskResult>,
        ) -> Result<crate::io::store::CasOutcome> {
            self.0.transition(id, guard, next, result)
        }

        fn update_task_status(
            &self,
            _id: &str,
            _status: TerminalStatus,
            _result: Option<&crate::core::types::TaskResult>,
        ) -> Result<()> {
            anyhow::bail!("write rejected")
        }

        fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
            self.0.list_by_status(status)
        }
    }

    #[test]
    fn report_write_failure_propagates() {
        let repo = TestRepo::with_origin("main");
        let git = repo.git();
        let agent = ScriptedAgent::failing("boom");
        let prs = ScriptedPullRequests::succeeding("https://github.com/acme/app/pull/1");
        let store = ReportsFail(MemoryTaskStore::new());
        store.0.insert(Task::pending("t1", "Add a"));
        let pipeline = Pipeline::new(&store, &git, &agent, &prs, PipelineSettings::default());

        let err = pipeline.process_next_task().expect_err("report fails");
        assert!(format!("{err:#}").contains("write rejected"));
        assert_eq!(store.0.get("t1").expect("task").status, TaskStatus::InProgress);
    }
}
