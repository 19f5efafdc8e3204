//! Pre-validation of task text against known-dangerous request patterns.
//!
//! The pattern list is static policy data: the pipeline only asks whether a
//! task matches and, if so, which reason to record on the failed task.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

struct DangerousPattern {
    pattern: &'static str,
    reason: &'static str,
}

const DANGEROUS_PATTERNS: &[DangerousPattern] = &[
    // Secrets and credentials
    DangerousPattern {
        pattern: r"\b(env|environment)\s*(var|variable)",
        reason: "Requests involving environment variables are not allowed",
    },
    DangerousPattern {
        pattern: r"\b(api[_-]?key|secret|token|credential|password)\b",
        reason: "Requests involving secrets or credentials are not allowed",
    },
    DangerousPattern {
        pattern: r"\bprocess\.env\b",
        reason: "Accessing process.env is not allowed",
    },
    DangerousPattern {
        pattern: r"\bimport\.meta\.env\b",
        reason: "Accessing import.meta.env is not allowed",
    },
    DangerousPattern {
        pattern: r"\.env\s*file",
        reason: "Modifying .env files is not allowed",
    },
    // Security modifications
    DangerousPattern {
        pattern: r"\b(remove|disable|bypass|skip)\s*(auth|authentication|login)",
        reason: "Modifying authentication is not allowed",
    },
    DangerousPattern {
        pattern: r"\b(remove|disable)\s*(security|protection)",
        reason: "Disabling security features is not allowed",
    },
    DangerousPattern {
        pattern: r"\bfirestore\.?rules\b",
        reason: "Modifying Firestore rules is not allowed",
    },
    // Destructive operations
    DangerousPattern {
        pattern: r"\b(delete|remove|drop)\s*(all|every|\*|database|collection|table)",
        reason: "Bulk deletion operations are not allowed",
    },
    DangerousPattern {
        pattern: r"\brm\s+-rf\b",
        reason: "Recursive force deletion is not allowed",
    },
    DangerousPattern {
        pattern: r"\bdel\s+/[sq]",
        reason: "Recursive deletion is not allowed",
    },
    // System and tool configuration
    DangerousPattern {
        pattern: r"\bgit\s*(config|credential)",
        reason: "Modifying git configuration is not allowed",
    },
    DangerousPattern {
        pattern: r"\bnpm\s*(config|set)",
        reason: "Modifying npm configuration is not allowed",
    },
    DangerousPattern {
        pattern: r"\b(install|add)\s*(-g|--global)",
        reason: "Installing global packages is not allowed",
    },
];

static COMPILED: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    DANGEROUS_PATTERNS
        .iter()
        .map(|p| {
            let re = RegexBuilder::new(p.pattern)
                .case_insensitive(true)
                .build()
                .expect("dangerous pattern is valid");
            (re, p.reason)
        })
        .collect()
});

/// Check a task's title and description.
///
/// Returns the reason of the first matching pattern, or `None` when the task
/// looks safe to hand to the agent.
pub fn validate_task_safety(title: &str, description: Option<&str>) -> Option<&'static str> {
    let text = format!("{title} {}", description.unwrap_or_default());
    COMPILED
        .iter()
        .find(|(re, _)| re.is_match(&text))
        .map(|(_, reason)| *reason)
}
