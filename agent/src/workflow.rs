//! Version-control workflow around one agent run.
//!
//! [`VersionControlWorkflow::setup`] leaves the working copy on a fresh
//! `task/<id>` branch cut from the up-to-date default branch;
//! [`VersionControlWorkflow::finalize`] commits whatever the agent changed,
//! pushes it and opens a pull request. Both report through a
//! [`WorkflowOutcome`] and never return errors.

use tracing::{info, instrument, warn};

use crate::core::naming::{branch_name, commit_message, extract_pr_url, pull_request_body};
use crate::core::pipeline::{TaskFailure, TaskWarning};
use crate::core::types::WorkflowOutcome;
use crate::io::git::Git;
use crate::io::pull_request::{PullRequestCreator, PullRequestRequest};

pub struct VersionControlWorkflow<'a, P> {
    git: &'a Git,
    /// `None` when pull requests are disabled.
    pull_requests: Option<&'a P>,
}

impl<'a, P: PullRequestCreator> VersionControlWorkflow<'a, P> {
    pub fn new(git: &'a Git, pull_requests: Option<&'a P>) -> Self {
        Self { git, pull_requests }
    }

    /// Prepare `task/<task_id>` from the default branch.
    ///
    /// Local drift is stashed first. A failed pull is tolerated. An existing
    /// task branch is deleted and recreated.
    #[instrument(skip_all, fields(task_id = %task_id))]
    pub fn setup(&self, task_id: &str) -> WorkflowOutcome {
        let default_branch = self.git.default_branch();
        info!(branch = %default_branch, "checking out default branch");

        let stash = self.git.stash_all();
        if !stash.success {
            warn!(err = stash.error_text(), "stash failed");
        }

        let checkout = self.git.checkout(&default_branch);
        if !checkout.success {
            return WorkflowOutcome::failed(
                None,
                TaskFailure::Checkout(checkout.error_text().to_string()).to_string(),
            );
        }

        let pull = self.git.pull();
        if !pull.success {
            warn!(err = pull.error_text(), "pull failed, continuing with local state");
        }

        let branch = branch_name(task_id);
        // Ignored: the branch usually does not exist yet.
        let _ = self.git.delete_branch(&branch);
        let created = self.git.checkout_new_branch(&branch);
        if !created.success {
            return WorkflowOutcome::failed(
                None,
                TaskFailure::CreateBranch(created.error_text().to_string()).to_string(),
            );
        }

        WorkflowOutcome {
            success: true,
            branch_name: Some(branch),
            ..WorkflowOutcome::default()
        }
    }

    /// Commit, push and open a PR for the agent's changes on `branch`.
    #[instrument(skip_all, fields(task_id = %task_id, branch = %branch))]
    pub fn finalize(&self, task_id: &str, title: &str, branch: &str) -> WorkflowOutcome {
        let failed = |failure: TaskFailure| {
            WorkflowOutcome::failed(Some(branch.to_string()), failure.to_string())
        };

        match self.git.status_porcelain() {
            Ok(entries) if entries.is_empty() => return failed(TaskFailure::NoChanges),
            Ok(entries) => info!(changed = entries.len(), "agent changed files"),
            Err(err) => return failed(TaskFailure::Unexpected(format!("{err:#}"))),
        }

        let staged = self.git.add_all();
        if !staged.success {
            return failed(TaskFailure::Stage(staged.error_text().to_string()));
        }
        let committed = self.git.commit(&commit_message(title));
        if !committed.success {
            return failed(TaskFailure::Commit(committed.error_text().to_string()));
        }

        let commit_hash = match self.git.head_sha() {
            Ok(sha) => Some(sha),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not read commit hash");
                None
            }
        };
        let mut outcome = WorkflowOutcome {
            success: true,
            branch_name: Some(branch.to_string()),
            commit_hash,
            ..WorkflowOutcome::default()
        };

        if !self.git.push_upstream(branch).success {
            outcome.error = Some(TaskWarning::PushFailed.to_string());
            return outcome;
        }

        let Some(creator) = self.pull_requests else {
            return outcome;
        };
        let body = pull_request_body(task_id, title);
        let created = creator.create(&PullRequestRequest {
            title,
            body: &body,
            workdir: self.git.workdir(),
        });
        if created.success {
            outcome.pr_url = extract_pr_url(&created.output);
            if outcome.pr_url.is_none() {
                warn!("pull request created but no URL found in output");
            }
        } else {
            let warning = TaskWarning::PullRequestFailed(created.error_text().to_string());
            warn!(err = %warning, "pull request creation failed");
            outcome.error = Some(warning.to_string());
        }
        outcome
    }
}
