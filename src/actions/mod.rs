//! Action registry: the named abilities the model may invoke.
//!
//! Each action carries parameter metadata that is rendered into the task
//! prompt. Dispatch looks the name up, validates required arguments, fills
//! in declared defaults and runs the action.

mod files;
mod git;
mod github;
mod progress;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::db::AgentDb;
use crate::llm::LlmClient;
use crate::workspace::LocalWorkspace;

pub use files::{ListFiles, ModifyFile, ReadFile, WriteFile};
pub use git::{CloneRepo, CommitChanges, CreateBranch, PushBranch};
pub use github::{AddComment, CreatePullRequest, FetchIssue, FetchIssues, GithubClient};
pub use progress::{CantMakeProgress, Finish};

/// Name of the reserved pseudo-action that ends a task.
pub const FINISH_ACTION: &str = "finish";

/// Describes one argument of an action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionParameter {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "type")]
    pub param_type: &'static str,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ActionParameter {
    pub fn required(name: &'static str, param_type: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            param_type,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &'static str, param_type: &'static str, description: &'static str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Services available to an action while it runs.
pub struct ActionContext<'a> {
    pub task_id: Uuid,
    pub workspace: &'a LocalWorkspace,
    pub db: &'a dyn AgentDb,
    pub llm: &'a dyn LlmClient,
    pub github: &'a GithubClient,
    pub config: &'a Config,
}

impl ActionContext<'_> {
    /// Workspace key of the current task.
    pub fn task_key(&self) -> String {
        self.task_id.to_string()
    }
}

/// A named ability the agent can invoke.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> Vec<ActionParameter>;

    fn output_type(&self) -> &str {
        "string"
    }

    /// Run with arguments that already passed registry validation.
    async fn run(&self, ctx: &ActionContext<'_>, args: &Value) -> anyhow::Result<String>;
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unknown action: {0}")]
    Unknown(String),

    #[error("action '{action}' is missing required argument '{param}'")]
    MissingArgument { action: String, param: String },

    #[error("arguments for '{0}' must be a JSON object")]
    InvalidArguments(String),

    #[error("action '{action}' failed: {message}")]
    Failed { action: String, message: String },
}

/// Name-to-action mapping.
pub struct ActionRegistry {
    actions: BTreeMap<String, Arc<dyn Action>>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRegistry {
    /// Registry with the built-in catalogue.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ListFiles));
        registry.register(Arc::new(ReadFile));
        registry.register(Arc::new(WriteFile));
        registry.register(Arc::new(ModifyFile));
        registry.register(Arc::new(CloneRepo));
        registry.register(Arc::new(CreateBranch));
        registry.register(Arc::new(CommitChanges));
        registry.register(Arc::new(PushBranch));
        registry.register(Arc::new(CreatePullRequest));
        registry.register(Arc::new(FetchIssues));
        registry.register(Arc::new(FetchIssue));
        registry.register(Arc::new(AddComment));
        registry.register(Arc::new(CantMakeProgress));
        registry.register(Arc::new(Finish));
        registry
    }

    pub fn empty() -> Self {
        Self {
            actions: BTreeMap::new(),
        }
    }

    /// Add or replace an action.
    pub fn register(&mut self, action: Arc<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Action>> {
        self.actions.get(name)
    }

    /// Registered names, sorted.
    pub fn list_abilities(&self) -> Vec<String> {
        self.actions.keys().cloned().collect()
    }

    /// One line per action: `name(p: type, ...) -> output. Usage: description`.
    pub fn list_for_prompt(&self) -> Vec<String> {
        self.actions
            .values()
            .map(|action| {
                let params = action
                    .parameters()
                    .iter()
                    .map(|p| format!("{}: {}", p.name, p.param_type))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "{}({}) -> {}. Usage: {}",
                    action.name(),
                    params,
                    action.output_type(),
                    action.description()
                )
            })
            .collect()
    }

    /// Validate `args` against the action's parameters and run it.
    pub async fn run_action(
        &self,
        ctx: &ActionContext<'_>,
        name: &str,
        args: &Value,
    ) -> Result<String, ActionError> {
        let action = self
            .get(name)
            .ok_or_else(|| ActionError::Unknown(name.to_string()))?;
        let args = prepare_args(action.as_ref(), args)?;

        tracing::info!(task_id = %ctx.task_id, action = name, "Running action");
        action
            .run(ctx, &args)
            .await
            .map_err(|e| ActionError::Failed {
                action: name.to_string(),
                message: format!("{:#}", e),
            })
    }
}

fn prepare_args(action: &dyn Action, args: &Value) -> Result<Value, ActionError> {
    let mut map = match args {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        _ => return Err(ActionError::InvalidArguments(action.name().to_string())),
    };

    for param in action.parameters() {
        let present = map.get(param.name).is_some_and(|v| !v.is_null());
        if present {
            continue;
        }
        if let Some(default) = param.default {
            map.insert(param.name.to_string(), default);
        } else if param.required {
            return Err(ActionError::MissingArgument {
                action: action.name().to_string(),
                param: param.name.to_string(),
            });
        }
    }
    Ok(Value::Object(map))
}

/// Required string argument.
pub(crate) fn str_arg<'a>(args: &'a Value, name: &str) -> anyhow::Result<&'a str> {
    args[name]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' argument", name))
}

/// Optional, non-empty string argument.
pub(crate) fn opt_str_arg<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args[name].as_str().filter(|s| !s.trim().is_empty())
}

/// Integer argument; numeric strings are accepted since models often quote numbers.
pub(crate) fn u64_arg(args: &Value, name: &str) -> anyhow::Result<u64> {
    match &args[name] {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| anyhow::anyhow!("'{}' must be a non-negative integer", name)),
        Value::String(s) => s
            .trim()
            .trim_start_matches('#')
            .parse()
            .map_err(|_| anyhow::anyhow!("'{}' must be an integer, got '{}'", name, s)),
        _ => Err(anyhow::anyhow!("Missing '{}' argument", name)),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for action tests.

    use std::path::Path;

    use async_trait::async_trait;

    use super::*;
    use crate::db::InMemoryAgentDb;
    use crate::llm::{ChatMessage, LlmError};

    /// LLM double that always answers with the same text.
    pub struct FixedReply(pub String);

    #[async_trait]
    impl LlmClient for FixedReply {
        async fn chat_completion(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
        ) -> Result<String, LlmError> {
            Ok(self.0.clone())
        }
    }

    pub struct Fixture {
        pub task_id: Uuid,
        pub workspace: LocalWorkspace,
        pub db: InMemoryAgentDb,
        pub llm: FixedReply,
        pub github: GithubClient,
        pub config: Config,
    }

    impl Fixture {
        pub async fn new(base: &Path) -> Self {
            let db = InMemoryAgentDb::new();
            let task = db.create_task("test task", None).await.unwrap();
            let config = Config::new("key".into(), "gpt-4".into(), base.to_path_buf());
            Self {
                task_id: task.task_id,
                workspace: LocalWorkspace::new(base),
                db,
                llm: FixedReply(String::new()),
                github: GithubClient::new(&config.github).unwrap(),
                config,
            }
        }

        pub fn ctx(&self) -> ActionContext<'_> {
            ActionContext {
                task_id: self.task_id,
                workspace: &self.workspace,
                db: &self.db,
                llm: &self.llm,
                github: &self.github,
                config: &self.config,
            }
        }
    }
}
