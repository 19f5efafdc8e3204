//! Agent prompt rendering.

use anyhow::Result;
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::types::Task;

const TASK_TEMPLATE: &str = include_str!("prompts/task.md");
const SAFETY_RULES: &str = include_str!("prompts/safety_rules.md");

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("task", TASK_TEMPLATE)?;
        Ok(Self { env })
    }

    fn render_task(&self, task: &Task, include_rules: bool) -> Result<String> {
        let template = self.env.get_template("task")?;
        let rendered = template.render(context! {
            rules => include_rules.then(|| SAFETY_RULES.trim()),
            title => task.title.trim(),
            description => task.description_text(),
        })?;
        Ok(rendered)
    }
}

/// Render the prompt handed to the agent on stdin.
///
/// Layout: optional safety preamble, the task title, then
/// `Additional instructions: <description>` when the task has one.
pub fn render_task_prompt(task: &Task, include_rules: bool) -> Result<String> {
    let prompt = PromptEngine::new()?.render_task(task, include_rules)?;
    debug!(task_id = %task.id, bytes = prompt.len(), include_rules, "rendered prompt");
    Ok(prompt)
}
