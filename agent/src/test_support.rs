//! Test-only helpers: throwaway git repositories and scripted agent/PR tools.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::TempDir;

use crate::io::agent::{AgentRequest, AgentRunner};
use crate::io::git::Git;
use crate::io::process::CommandResult;
use crate::io::pull_request::{PullRequestCreator, PullRequestRequest};

/// A work repository with one initial commit, optionally pushed to a bare `origin`.
pub struct TestRepo {
    _temp: TempDir,
    work: PathBuf,
    origin: Option<PathBuf>,
}

impl TestRepo {
    /// Work repo on `branch`, pushed to a bare origin whose HEAD points at it.
    pub fn with_origin(branch: &str) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let origin = temp.path().join("origin.git");
        run_git(temp.path(), &["init", "--bare", "-q", "origin.git"]);
        run_git(&origin, &["symbolic-ref", "HEAD", &format!("refs/heads/{branch}")]);

        let work = init_work_repo(temp.path(), branch);
        let origin_arg = origin.to_string_lossy().into_owned();
        run_git(&work, &["remote", "add", "origin", &origin_arg]);
        run_git(&work, &["push", "-q", "-u", "origin", branch]);
        run_git(&work, &["remote", "set-head", "origin", branch]);

        Self {
            _temp: temp,
            work,
            origin: Some(origin),
        }
    }

    /// Work repo on `branch` with no remote at all.
    pub fn without_remote(branch: &str) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let work = init_work_repo(temp.path(), branch);
        Self {
            _temp: temp,
            work,
            origin: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.work
    }

    pub fn git(&self) -> Git {
        Git::new(&self.work, "origin", Duration::from_secs(60))
    }

    pub fn write_file(&self, rel: &str, contents: &str) {
        let path = self.work.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, contents).expect("write file");
    }

    /// Run git in the work repo and return trimmed stdout.
    pub fn run_git(&self, args: &[&str]) -> String {
        run_git(&self.work, args)
    }

    pub fn current_branch(&self) -> String {
        self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    pub fn last_commit_message(&self) -> String {
        self.run_git(&["log", "-1", "--format=%s"])
    }

    pub fn local_branch_exists(&self, branch: &str) -> bool {
        git_succeeds(
            &self.work,
            &["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")],
        )
    }

    pub fn origin_has_branch(&self, branch: &str) -> bool {
        let Some(origin) = &self.origin else {
            return false;
        };
        git_succeeds(
            origin,
            &["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")],
        )
    }

    /// Make every push fail while fetch and pull keep working.
    pub fn break_push(&self) {
        self.run_git(&["remote", "set-url", "--push", "origin", "/nonexistent/origin.git"]);
    }
}

fn init_work_repo(root: &Path, branch: &str) -> PathBuf {
    let work = root.join("work");
    fs::create_dir_all(&work).expect("create work dir");
    run_git(&work, &["init", "-q"]);
    run_git(&work, &["symbolic-ref", "HEAD", &format!("refs/heads/{branch}")]);
    run_git(&work, &["config", "user.name", "Task Agent Tests"]);
    run_git(&work, &["config", "user.email", "tests@example.com"]);
    run_git(&work, &["config", "commit.gpgsign", "false"]);
    fs::write(work.join("README.md"), "# app\n").expect("write readme");
    run_git(&work, &["add", "-A"]);
    run_git(&work, &["commit", "-q", "-m", "initial"]);
    work
}

fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn git_succeeds(dir: &Path, args: &[&str]) -> bool {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("spawn git")
        .success()
}

/// Agent stand-in that records prompts and edits the working copy directly.
pub struct ScriptedAgent {
    write: Option<(String, String)>,
    failure: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    /// Succeed after writing `contents` to `rel` in the working directory.
    pub fn writing(rel: &str, contents: &str) -> Self {
        Self {
            write: Some((rel.to_string(), contents.to_string())),
            failure: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Succeed without touching anything.
    pub fn idle() -> Self {
        Self {
            write: None,
            failure: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Fail with `error` as if the agent exited non-zero.
    pub fn failing(error: &str) -> Self {
        Self {
            write: None,
            failure: Some(error.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

impl AgentRunner for ScriptedAgent {
    fn run(&self, request: &AgentRequest<'_>) -> CommandResult {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(request.prompt.to_string());
        if let Some(error) = &self.failure {
            return CommandResult::failed(error.clone());
        }
        if let Some((rel, contents)) = &self.write {
            let path = request.workdir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("create parent");
            }
            fs::write(path, contents).expect("agent write");
        }
        CommandResult::ok("done\n")
    }
}

/// PR tool stand-in that records `(title, body)` pairs.
pub struct ScriptedPullRequests {
    result: CommandResult,
    requests: Mutex<Vec<(String, String)>>,
}

impl ScriptedPullRequests {
    /// Succeed, printing `output` (usually containing the PR URL).
    pub fn succeeding(output: &str) -> Self {
        Self {
            result: CommandResult::ok(format!("{output}\n")),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            result: CommandResult::failed(error),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl PullRequestCreator for ScriptedPullRequests {
    fn create(&self, request: &PullRequestRequest<'_>) -> CommandResult {
        self.requests
            .lock()
            .expect("requests lock")
            .push((request.title.to_string(), request.body.to_string()));
        self.result.clone()
    }
}
