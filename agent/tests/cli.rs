//! CLI tests: spawn the binary and check output and exit codes.

use std::fs;
use std::process::Command;

use task_agent::exit_codes;

const STORE_VARS: [&str; 4] = [
    "VITE_FIREBASE_PROJECT_ID",
    "FIREBASE_PROJECT_ID",
    "VITE_FIREBASE_API_KEY",
    "FIREBASE_API_KEY",
];

fn agent_cmd(dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_task-agent"));
    cmd.current_dir(dir)
        .env_remove("AGENT_POLL_INTERVAL")
        .env_remove("AGENT_WORKING_DIR")
        .env("RUST_LOG", "warn");
    for var in STORE_VARS {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn show_config_applies_env_and_redacts_key() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = agent_cmd(temp.path())
        .env("AGENT_POLL_INTERVAL", "2500")
        .env("FIREBASE_PROJECT_ID", "demo-project")
        .env("FIREBASE_API_KEY", "super-secret-key")
        .arg("show-config")
        .output()
        .expect("task-agent show-config");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("poll_interval_ms = 2500"), "{stdout}");
    assert!(stdout.contains("demo-project"), "{stdout}");
    assert!(!stdout.contains("super-secret-key"), "{stdout}");
}

#[test]
fn show_config_reads_config_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("custom.toml");
    fs::write(&path, "[git]\nremote = \"upstream\"\n").expect("write config");

    let output = agent_cmd(temp.path())
        .args(["--config", "custom.toml", "show-config"])
        .output()
        .expect("task-agent show-config");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("remote = \"upstream\""), "{stdout}");
}

#[test]
fn once_without_credentials_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = agent_cmd(temp.path())
        .arg("once")
        .output()
        .expect("task-agent once");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing task store project id"), "{stderr}");
}

#[test]
fn malformed_config_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("task-agent.toml"), "poll_interval_ms = \"fast\"\n")
        .expect("write config");

    let status = agent_cmd(temp.path())
        .arg("show-config")
        .status()
        .expect("task-agent show-config");

    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[test]
fn bad_poll_interval_env_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = agent_cmd(temp.path())
        .env("AGENT_POLL_INTERVAL", "soon")
        .arg("show-config")
        .output()
        .expect("task-agent show-config");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("AGENT_POLL_INTERVAL"), "{stderr}");
}
