//! Pull request creation through an external CLI (`gh pr create` by default).

use std::path::Path;
use std::time::Duration;

use tracing::instrument;

use crate::io::config::PullRequestSection;
use crate::io::process::{CommandResult, CommandSpec, run_step};

/// Parameters for one pull request.
#[derive(Debug, Clone, Copy)]
pub struct PullRequestRequest<'a> {
    pub title: &'a str,
    pub body: &'a str,
    pub workdir: &'a Path,
}

/// Abstraction over PR tools; the URL is extracted from `output` by the caller.
pub trait PullRequestCreator {
    fn create(&self, request: &PullRequestRequest<'_>) -> CommandResult;
}

/// PR creator that runs a configured command with `--title` and `--body` appended.
#[derive(Debug, Clone)]
pub struct PullRequestCli {
    command: Vec<String>,
    timeout: Duration,
}

impl PullRequestCli {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn from_config(section: &PullRequestSection) -> Self {
        Self::new(
            section.command.clone(),
            Duration::from_secs(section.timeout_secs),
        )
    }
}

impl PullRequestCreator for PullRequestCli {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn create(&self, request: &PullRequestRequest<'_>) -> CommandResult {
        let spec = match CommandSpec::from_argv(&self.command, self.timeout) {
            Ok(spec) => spec,
            Err(err) => return CommandResult::failed(err.to_string()),
        };
        let spec = spec
            .args(["--title", request.title, "--body", request.body])
            .workdir(request.workdir)
            .env("GH_PROMPT_DISABLED", "1");
        run_step(&spec)
    }
}
