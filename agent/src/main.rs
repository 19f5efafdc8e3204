//! Polling task agent.
//!
//! Claims pending change requests from the task store, lets an external coding
//! agent implement each one on a `task/<id>` branch, and reports the commit and
//! pull request back to the store.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use task_agent::exit_codes;
use task_agent::io::agent::CommandAgent;
use task_agent::io::config::{AgentConfig, load_effective_config};
use task_agent::io::git::Git;
use task_agent::io::pull_request::PullRequestCli;
use task_agent::io::store::FirestoreTaskStore;
use task_agent::logging;
use task_agent::orchestrator::{Pipeline, PipelineSettings};
use task_agent::recovery::recover_stale_tasks;
use task_agent::scheduler::PollingScheduler;

const SIGNAL_EXIT: i32 = 130;

#[derive(Parser)]
#[command(
    name = "task-agent",
    version,
    about = "Turn queued change requests into pull requests with a coding agent"
)]
struct Cli {
    /// Config file (missing file means defaults).
    #[arg(long, global = true, default_value = "task-agent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll for tasks until interrupted.
    Run,
    /// Process at most one pending task, then exit (exit code 2 when none).
    Once,
    /// Print the effective configuration with secrets redacted.
    ShowConfig,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cfg = load_effective_config(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;
    match cli.command {
        Command::Run => cmd_run(&cfg),
        Command::Once => cmd_once(&cfg),
        Command::ShowConfig => cmd_show_config(&cfg),
    }
}

fn cmd_show_config(cfg: &AgentConfig) -> Result<i32> {
    let rendered = toml::to_string_pretty(&cfg.redacted()).context("serialize config toml")?;
    print!("{rendered}");
    Ok(exit_codes::OK)
}

/// Long-lived adapters shared by every poll.
struct Runtime {
    store: FirestoreTaskStore,
    git: Git,
    agent: CommandAgent,
    pull_requests: PullRequestCli,
    settings: PipelineSettings,
}

impl Runtime {
    fn from_config(cfg: &AgentConfig) -> Result<Self> {
        let credentials = cfg.store_credentials()?;
        let workdir = cfg.resolved_working_dir()?;
        ensure_directory(&workdir)?;
        info!(
            project_id = %credentials.project_id,
            working_dir = %workdir.display(),
            "agent configured"
        );
        Ok(Self {
            store: FirestoreTaskStore::new(&credentials, &cfg.store)?,
            git: Git::new(
                workdir,
                cfg.git.remote.clone(),
                Duration::from_secs(cfg.git.timeout_secs),
            ),
            agent: CommandAgent::from_config(&cfg.agent),
            pull_requests: PullRequestCli::from_config(&cfg.pull_request),
            settings: PipelineSettings::from(cfg),
        })
    }

    fn pipeline(&self) -> Pipeline<'_, FirestoreTaskStore, CommandAgent, PullRequestCli> {
        Pipeline::new(
            &self.store,
            &self.git,
            &self.agent,
            &self.pull_requests,
            self.settings,
        )
    }
}

fn ensure_directory(path: &Path) -> Result<()> {
    if !path.is_dir() {
        bail!("working directory {} does not exist", path.display());
    }
    Ok(())
}

fn cmd_once(cfg: &AgentConfig) -> Result<i32> {
    let runtime = Runtime::from_config(cfg)?;
    if runtime.pipeline().process_next_task()? {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::NO_TASK)
    }
}

fn cmd_run(cfg: &AgentConfig) -> Result<i32> {
    let runtime = Runtime::from_config(cfg)?;

    if cfg.recovery.stale_after_secs > 0 {
        let stale_after = Duration::from_secs(cfg.recovery.stale_after_secs);
        match recover_stale_tasks(&runtime.store, stale_after, Utc::now()) {
            Ok(ids) if !ids.is_empty() => info!(count = ids.len(), "recovered abandoned tasks"),
            Ok(_) => {}
            Err(err) => warn!(err = %format!("{err:#}"), "recovery sweep failed"),
        }
    }

    let scheduler = PollingScheduler::new(cfg.poll_interval(), cfg.backlog_delay());
    let handle = scheduler.handle();
    let interrupted = AtomicBool::new(false);
    ctrlc::set_handler(move || {
        if interrupted.swap(true, Ordering::SeqCst) {
            eprintln!("second interrupt, exiting without waiting for the current task");
            std::process::exit(SIGNAL_EXIT);
        }
        info!("interrupt received, finishing the current task before exit");
        handle.stop();
    })
    .context("install signal handler")?;

    let pipeline = runtime.pipeline();
    if scheduler.start(|| pipeline.process_next_task()).is_none() {
        bail!("scheduler was already running");
    }
    Ok(exit_codes::OK)
}
