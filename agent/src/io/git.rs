//! Git adapter for the task workflow.
//!
//! Every call is a blocking `git` subprocess in the working directory, bounded
//! by the configured timeout. Steps whose failure the workflow must inspect
//! return a [`CommandResult`]; plumbing queries return `Result`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::naming::strip_remote_prefix;
use crate::io::process::{CommandResult, CommandSpec, run_step};

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    remote: String,
    timeout: Duration,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, remote: impl Into<String>, timeout: Duration) -> Self {
        Self {
            workdir: workdir.into(),
            remote: remote.into(),
            timeout,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Resolve the default branch.
    ///
    /// Tries the remote's default ref first, then a local `main`, and falls
    /// back to `master` without checking it.
    #[instrument(skip_all)]
    pub fn default_branch(&self) -> String {
        let head_ref = format!("refs/remotes/{}/HEAD", self.remote);
        let remote_head = self.run(&["symbolic-ref", &head_ref, "--short"]);
        if remote_head.success {
            let name = strip_remote_prefix(&remote_head.output, &self.remote);
            if !name.is_empty() {
                debug!(branch = name, "default branch from remote HEAD");
                return name.to_string();
            }
        }
        if self.run(&["rev-parse", "--verify", "main"]).success {
            debug!("default branch is local main");
            return "main".to_string();
        }
        debug!("assuming master as default branch");
        "master".to_string()
    }

    /// Stash tracked and untracked changes so checkouts start from a clean tree.
    pub fn stash_all(&self) -> CommandResult {
        self.run(&["stash", "--include-untracked"])
    }

    #[instrument(skip_all, fields(branch))]
    pub fn checkout(&self, branch: &str) -> CommandResult {
        debug!(branch, "checking out branch");
        self.run(&["checkout", branch])
    }

    pub fn pull(&self) -> CommandResult {
        self.run(&["pull"])
    }

    /// Force-delete a local branch; callers decide whether failure matters.
    pub fn delete_branch(&self, branch: &str) -> CommandResult {
        self.run(&["branch", "-D", branch])
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> CommandResult {
        debug!(branch, "creating and checking out new branch");
        self.run(&["checkout", "-b", branch])
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_checked(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> CommandResult {
        self.run(&["add", "-A"])
    }

    #[instrument(skip_all)]
    pub fn commit(&self, message: &str) -> CommandResult {
        self.run(&["commit", "-m", message])
    }

    /// Full SHA of HEAD.
    pub fn head_sha(&self) -> Result<String> {
        let out = self.run_checked(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Push a branch and set its upstream.
    #[instrument(skip_all, fields(branch))]
    pub fn push_upstream(&self, branch: &str) -> CommandResult {
        let result = self.run(&["push", "-u", &self.remote, branch]);
        if !result.success {
            warn!(branch, err = result.error_text(), "push failed");
        }
        result
    }

    fn run_checked(&self, args: &[&str]) -> Result<String> {
        let result = self.run(args);
        if !result.success {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                result.error_text()
            ));
        }
        Ok(result.output)
    }

    fn run(&self, args: &[&str]) -> CommandResult {
        let spec = CommandSpec::new("git", self.timeout)
            .args(args)
            .workdir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0");
        run_step(&spec)
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
