//! External coding agent invocation.
//!
//! The [`AgentRunner`] trait decouples the pipeline from the actual agent
//! binary. Tests use scripted runners that edit the working copy directly
//! without spawning the real agent.

use std::path::Path;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::io::config::AgentSection;
use crate::io::process::{CommandResult, CommandSpec, describe_timeout, run_command};

/// Parameters for one agent run.
#[derive(Debug, Clone, Copy)]
pub struct AgentRequest<'a> {
    pub prompt: &'a str,
    pub workdir: &'a Path,
}

/// Abstraction over agent backends.
pub trait AgentRunner {
    /// Run the agent to completion. Every failure is reported in the result.
    fn run(&self, request: &AgentRequest<'_>) -> CommandResult;
}

/// Agent spawned from a configured command line, prompt on stdin.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandAgent {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(section: &AgentSection) -> Self {
        Self::new(
            section.command.clone(),
            Duration::from_secs(section.timeout_secs),
            section.output_limit_bytes,
        )
    }
}

impl AgentRunner for CommandAgent {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn run(&self, request: &AgentRequest<'_>) -> CommandResult {
        let spec = match CommandSpec::from_argv(&self.command, self.timeout) {
            Ok(spec) => spec,
            Err(err) => return CommandResult::failed(format!("Failed to start agent: {err}")),
        };
        let spec = spec
            .workdir(request.workdir)
            .env("CI", "true")
            .stdin(request.prompt)
            .output_limit(self.output_limit_bytes)
            .passthrough(true);

        info!(
            program = %spec.program(),
            workdir = %request.workdir.display(),
            "starting agent"
        );
        let output = match run_command(&spec) {
            Ok(output) => output,
            Err(err) => {
                return CommandResult::failed(format!("Failed to start agent: {}", err.root_cause()));
            }
        };

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "agent timed out");
            return CommandResult {
                success: false,
                output: output.stdout_text(),
                error: Some(format!("Agent timed out after {}", describe_timeout(self.timeout))),
            };
        }

        info!(exit_code = ?output.status.code(), "agent exited");
        CommandResult::from_output(&output)
    }
}
