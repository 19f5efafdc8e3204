//! Agent configuration: a TOML file, then environment overrides on top.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const ENV_POLL_INTERVAL: &str = "AGENT_POLL_INTERVAL";
pub const ENV_WORKING_DIR: &str = "AGENT_WORKING_DIR";
const ENV_PROJECT_ID: [&str; 2] = ["VITE_FIREBASE_PROJECT_ID", "FIREBASE_PROJECT_ID"];
const ENV_API_KEY: [&str; 2] = ["VITE_FIREBASE_API_KEY", "FIREBASE_API_KEY"];

const REDACTED: &str = "<redacted>";

/// Agent configuration (TOML).
///
/// Missing fields default to the values the agent ships with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Wait between polls when the queue was empty.
    pub poll_interval_ms: u64,

    /// Wait before the next poll after a task was processed.
    pub backlog_delay_ms: u64,

    /// Repository the agent works in.
    pub working_dir: PathBuf,

    pub store: StoreSection,
    pub agent: AgentSection,
    pub git: GitSection,
    pub pull_request: PullRequestSection,
    pub safety: SafetySection,
    pub recovery: RecoverySection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreSection {
    pub project_id: Option<String>,
    pub api_key: Option<String>,
    pub database: String,
    pub collection: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentSection {
    /// Agent command line; the prompt is written to its stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitSection {
    pub remote: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PullRequestSection {
    pub enabled: bool,
    /// PR command; `--title` and `--body` are appended.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SafetySection {
    /// Reject tasks matching the dangerous-pattern list before any work.
    pub validate: bool,
    /// Prepend the safety rules to every prompt.
    pub prepend_rules: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RecoverySection {
    /// Fail `in_progress` tasks untouched for this long at startup; 0 disables.
    pub stale_after_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            backlog_delay_ms: 1_000,
            working_dir: PathBuf::from("."),
            store: StoreSection::default(),
            agent: AgentSection::default(),
            git: GitSection::default(),
            pull_request: PullRequestSection::default(),
            safety: SafetySection::default(),
            recovery: RecoverySection::default(),
        }
    }
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            project_id: None,
            api_key: None,
            database: "(default)".to_string(),
            collection: "tasks".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: vec![
                "claude".to_string(),
                "-p".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            timeout_secs: 30 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for GitSection {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            timeout_secs: 5 * 60,
        }
    }
}

impl Default for PullRequestSection {
    fn default() -> Self {
        Self {
            enabled: true,
            command: vec!["gh".to_string(), "pr".to_string(), "create".to_string()],
            timeout_secs: 2 * 60,
        }
    }
}

impl Default for SafetySection {
    fn default() -> Self {
        Self {
            validate: true,
            prepend_rules: true,
        }
    }
}

/// Project id and web API key for the task store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub project_id: String,
    pub api_key: String,
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be > 0"));
        }
        if self.working_dir.as_os_str().is_empty() {
            return Err(anyhow!("working_dir must not be empty"));
        }
        if self.store.collection.trim().is_empty() {
            return Err(anyhow!("store.collection must not be empty"));
        }
        if self.store.database.trim().is_empty() {
            return Err(anyhow!("store.database must not be empty"));
        }
        if self.store.request_timeout_secs == 0 {
            return Err(anyhow!("store.request_timeout_secs must be > 0"));
        }
        if !is_command(&self.agent.command) {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.git.remote.trim().is_empty() {
            return Err(anyhow!("git.remote must not be empty"));
        }
        if self.git.timeout_secs == 0 {
            return Err(anyhow!("git.timeout_secs must be > 0"));
        }
        if self.pull_request.enabled && !is_command(&self.pull_request.command) {
            return Err(anyhow!("pull_request.command must be a non-empty array"));
        }
        if self.pull_request.timeout_secs == 0 {
            return Err(anyhow!("pull_request.timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backlog_delay(&self) -> Duration {
        Duration::from_millis(self.backlog_delay_ms)
    }

    /// Working directory made absolute against the current directory.
    pub fn resolved_working_dir(&self) -> Result<PathBuf> {
        std::path::absolute(&self.working_dir)
            .with_context(|| format!("resolve working dir {}", self.working_dir.display()))
    }

    /// Store credentials; missing values are fatal at startup.
    pub fn store_credentials(&self) -> Result<StoreCredentials> {
        let project_id = non_blank(self.store.project_id.as_deref()).ok_or_else(|| {
            anyhow!(
                "missing task store project id: set {} or store.project_id",
                ENV_PROJECT_ID.join(" / ")
            )
        })?;
        let api_key = non_blank(self.store.api_key.as_deref()).ok_or_else(|| {
            anyhow!(
                "missing task store api key: set {} or store.api_key",
                ENV_API_KEY.join(" / ")
            )
        })?;
        Ok(StoreCredentials {
            project_id: project_id.to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Copy suitable for printing.
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        if cfg.store.api_key.is_some() {
            cfg.store.api_key = Some(REDACTED.to_string());
        }
        cfg
    }

    /// Apply environment overrides using `lookup` (normally `std::env::var`).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_POLL_INTERVAL) {
            self.poll_interval_ms = raw
                .trim()
                .parse()
                .with_context(|| format!("parse {ENV_POLL_INTERVAL}='{raw}' as milliseconds"))?;
            debug!(poll_interval_ms = self.poll_interval_ms, "poll interval from env");
        }
        if let Some(dir) = lookup(ENV_WORKING_DIR).filter(|d| !d.trim().is_empty()) {
            self.working_dir = PathBuf::from(dir);
        }
        if let Some(project_id) = first_set(&lookup, &ENV_PROJECT_ID) {
            self.store.project_id = Some(project_id);
        }
        if let Some(api_key) = first_set(&lookup, &ENV_API_KEY) {
            self.store.api_key = Some(api_key);
        }
        Ok(())
    }
}

fn is_command(command: &[String]) -> bool {
    command.first().is_some_and(|program| !program.trim().is_empty())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn first_set<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .find(|value| !value.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`. Not validated;
/// see [`load_effective_config`].
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config file missing, using defaults");
        return Ok(AgentConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

/// File, then process environment, then validation.
pub fn load_effective_config(path: &Path) -> Result<AgentConfig> {
    let mut cfg = load_config(path)?;
    cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}
