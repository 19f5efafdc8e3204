//! Fixed naming formats for branches, commits and pull requests.

use std::sync::LazyLock;

use regex::Regex;

/// Prefix of every task branch.
pub const BRANCH_PREFIX: &str = "task/";

/// Deterministic branch name for a task: `task/<id>`.
pub fn branch_name(task_id: &str) -> String {
    format!("{BRANCH_PREFIX}{task_id}")
}

/// Commit message for a task: `Task: <title>`.
pub fn commit_message(title: &str) -> String {
    format!("Task: {title}")
}

/// Pull request body naming the task id and title.
pub fn pull_request_body(task_id: &str, title: &str) -> String {
    format!("Automated PR for task {task_id}\n\nTask: {title}")
}

/// Extract the first web URL from PR tool output.
///
/// Trailing sentence punctuation is not part of the URL.
pub fn extract_pr_url(output: &str) -> Option<String> {
    static URL_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"https?://[^\s<>]+").expect("url pattern is valid"));

    let found = URL_RE.find(output)?;
    let url = found
        .as_str()
        .trim_end_matches(['.', ',', ';', ')', '"', '\'']);
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or("");
    if rest.is_empty() || rest.starts_with('/') {
        return None;
    }
    Some(url.to_string())
}

/// Strip `<remote>/` from a remote-tracking ref such as `origin/main`.
pub fn strip_remote_prefix<'a>(reference: &'a str, remote: &str) -> &'a str {
    let reference = reference.trim();
    reference
        .strip_prefix(remote)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_are_fixed() {
        assert_eq!(branch_name("t1"), "task/t1");
        assert_eq!(commit_message("Add logout button"), "Task: Add logout button");
        assert_eq!(
            pull_request_body("t1", "Add logout button"),
            "Automated PR for task t1\n\nTask: Add logout button"
        );
    }

    #[test]
    fn extracts_url_from_gh_output() {
        let output = "Creating pull request for task/t1 into main in acme/app\n\nhttps://github.com/acme/app/pull/1\n";
        assert_eq!(
            extract_pr_url(output).as_deref(),
            Some("https://github.com/acme/app/pull/1")
        );
    }

    #[test]
    fn extracts_url_without_trailing_punctuation() {
        assert_eq!(
            extract_pr_url("opened (https://git.example.com/acme/app/merge_requests/7).").as_deref(),
            Some("https://git.example.com/acme/app/merge_requests/7")
        );
    }

    #[test]
    fn missing_url_is_none() {
        assert_eq!(extract_pr_url("pull request created"), None);
        assert_eq!(extract_pr_url("see https:// for details"), None);
        assert_eq!(extract_pr_url(""), None);
    }

    #[test]
    fn strips_remote_prefix_only_when_present() {
        assert_eq!(strip_remote_prefix("origin/main\n", "origin"), "main");
        assert_eq!(strip_remote_prefix("upstream/trunk", "upstream"), "trunk");
        assert_eq!(strip_remote_prefix("main", "origin"), "main");
        assert_eq!(strip_remote_prefix("originals/x", "origin"), "originals/x");
    }
}
