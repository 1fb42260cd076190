//! Prompt templates for the agent.

use minijinja::{context, Environment};
use serde::Serialize;
use thiserror::Error;

use crate::db::ActionRecord;

const SYSTEM_FORMAT_TEMPLATE: &str = include_str!("templates/system-format.j2");
const TASK_STEP_TEMPLATE: &str = include_str!("templates/task-step.j2");
const SUGGESTED_FILE_CHANGE_TEMPLATE: &str = include_str!("templates/suggested-file-change.j2");

/// Longest action output replayed into a prompt.
const MAX_REPLAYED_OUTPUT: usize = 2000;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("unknown prompt template: {0}")]
    UnknownTemplate(String),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),
}

/// An earlier action as shown to the model.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PreviousAction {
    pub name: String,
    pub args: String,
    pub reason: String,
    pub output: String,
}

impl From<&ActionRecord> for PreviousAction {
    fn from(record: &ActionRecord) -> Self {
        Self {
            name: record.name.clone(),
            args: record.args.to_string(),
            reason: record.reason.clone(),
            output: truncate_output(&record.output, MAX_REPLAYED_OUTPUT),
        }
    }
}

/// Parameters of the `task-step` template.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStepParams<'a> {
    pub task: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expert: Option<&'a str>,
    pub actions: Vec<String>,
    pub best_practices: &'a [&'a str],
    pub previous_actions: Vec<PreviousAction>,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self, PromptError> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("system-format", SYSTEM_FORMAT_TEMPLATE)?;
        env.add_template("task-step", TASK_STEP_TEMPLATE)?;
        env.add_template("suggested-file-change", SUGGESTED_FILE_CHANGE_TEMPLATE)?;
        Ok(Self { env })
    }

    /// Render the named template with `ctx`.
    pub fn load_prompt<S: Serialize>(&self, name: &str, ctx: S) -> Result<String, PromptError> {
        let template = self
            .env
            .get_template(name)
            .map_err(|_| PromptError::UnknownTemplate(name.to_string()))?;
        Ok(template.render(ctx)?.trim().to_string())
    }

    pub fn system_format(&self) -> Result<String, PromptError> {
        self.load_prompt("system-format", context! {})
    }

    pub fn task_step(&self, params: &TaskStepParams<'_>) -> Result<String, PromptError> {
        self.load_prompt("task-step", params)
    }

    pub fn suggested_file_change(&self, issue_text: &str, file: &str) -> Result<String, PromptError> {
        self.load_prompt(
            "suggested-file-change",
            context! { issue_text => issue_text, file => file },
        )
    }
}

/// Truncate on a char boundary, marking the cut.
fn truncate_output(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}
