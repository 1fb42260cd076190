//! Step execution.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::actions::{ActionContext, ActionRegistry, GithubClient, FINISH_ACTION};
use crate::config::Config;
use crate::db::{AgentDb, DbError, NewStep, Step, StepStatus, Task};
use crate::llm::{ChatMessage, LlmClient, Role};
use crate::workspace::LocalWorkspace;

use super::answer::AgentAnswer;
use super::prompt::{PreviousAction, PromptEngine, PromptError, TaskStepParams};

/// Step output when the model asked for something that could not be run.
pub const BAD_ACTION_OUTPUT: &str = "Asked for bad action";

const BEST_PRACTICES: &[&str] = &[
    "File operations should all be done in the local directory when possible.  Don't base file paths off of the root directory.",
    "When possible, use the abilities to validate the task was completed successfully",
    "If you're not making progress on the task like you expect, use your abilities to debug the problem",
    "If nothing is working, return the finish ability and provide an explination of what your assessment is of why the task cannot be completed.",
];

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("could not build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("no usable answer from the model after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Input of one step. Without `input` the task input is reused.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepRequest {
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub additional_input: Option<Value>,
}

/// The autonomous agent.
pub struct Agent {
    config: Arc<Config>,
    llm: Arc<dyn LlmClient>,
    db: Arc<dyn AgentDb>,
    workspace: LocalWorkspace,
    github: GithubClient,
    actions: ActionRegistry,
    prompts: PromptEngine,
}

impl Agent {
    /// Create an agent with the built-in action catalogue.
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmClient>,
        db: Arc<dyn AgentDb>,
    ) -> Result<Self, AgentError> {
        let workspace = LocalWorkspace::new(&config.workspace_path);
        let github = GithubClient::new(&config.github)?;
        Ok(Self {
            config: Arc::new(config),
            llm,
            db,
            workspace,
            github,
            actions: ActionRegistry::new(),
            prompts: PromptEngine::new()?,
        })
    }

    /// Replace the action catalogue.
    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Arc<dyn AgentDb> {
        &self.db
    }

    pub fn workspace(&self) -> &LocalWorkspace {
        &self.workspace
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub async fn create_task(
        &self,
        input: &str,
        additional_input: Option<Value>,
    ) -> Result<Task, AgentError> {
        let task = self.db.create_task(input, additional_input).await?;
        tracing::info!(
            task_id = %task.task_id,
            input = %preview(&task.input),
            "Task created"
        );
        Ok(task)
    }

    /// Ask the model for the next action and run it.
    pub async fn execute_step(
        &self,
        task_id: Uuid,
        request: StepRequest,
    ) -> Result<Step, AgentError> {
        let task = self.db.get_task(task_id).await.map_err(|e| match e {
            DbError::NotFound { .. } => AgentError::TaskNotFound(task_id),
            other => AgentError::Db(other),
        })?;
        let input = request
            .input
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| task.input.clone());

        let mut messages = self.db.get_chat_history(task_id).await.unwrap_or_else(|e| {
            tracing::warn!(%task_id, error = %e, "Could not load chat history");
            Vec::new()
        });
        let history = self.db.get_action_history(task_id).await.unwrap_or_else(|e| {
            tracing::warn!(%task_id, error = %e, "Could not load action history");
            Vec::new()
        });

        let first_turn = messages.is_empty();
        let params = TaskStepParams {
            task: &input,
            expert: first_turn.then_some("agent"),
            actions: self.actions.list_for_prompt(),
            best_practices: BEST_PRACTICES,
            // A finished run must not stop later steps in the same workspace.
            previous_actions: history
                .iter()
                .filter(|a| a.name != FINISH_ACTION)
                .map(PreviousAction::from)
                .collect(),
        };
        let task_prompt = self.prompts.task_step(&params)?;
        tracing::debug!(%task_id, prompt = %task_prompt, "Task prompt");

        if first_turn {
            let initial = [
                ChatMessage::system(self.prompts.system_format()?),
                ChatMessage::user(task_prompt),
            ];
            self.db.add_chat_history(task_id, &initial).await?;
            messages.extend(initial);
        } else {
            messages.push(ChatMessage::user(task_prompt));
            self.db.add_chat_message(task_id, Role::User, &input).await?;
        }

        let answer = self.request_answer(task_id, &messages).await?;

        if answer.is_finish() {
            return self.finish_step(task_id, &input, &answer).await;
        }

        let name = answer.action_name();
        tracing::debug!(%task_id, action = name, "Model requested action");
        if !self.actions.contains(name) {
            tracing::error!(%task_id, action = name, "Model asked for an action that does not exist");
            let mut new_step = NewStep::new(&input);
            new_step.name = Some("error".to_string());
            new_step.status = StepStatus::Completed;
            let mut step = self.db.create_step(task_id, new_step).await?;
            step.output = Some(BAD_ACTION_OUTPUT.to_string());
            return Ok(self.db.update_step(&step).await?);
        }

        let mut new_step = NewStep::new(&input);
        new_step.name = Some(name.to_string());
        new_step.status = StepStatus::Running;
        new_step.additional_input = request.additional_input;
        let mut step = self.db.create_step(task_id, new_step).await?;

        let ctx = ActionContext {
            task_id,
            workspace: &self.workspace,
            db: self.db.as_ref(),
            llm: self.llm.as_ref(),
            github: &self.github,
            config: &self.config,
        };
        let (action_output, step_output) =
            match self.actions.run_action(&ctx, name, answer.args()).await {
                Ok(output) => (output.clone(), output),
                Err(e) => {
                    tracing::error!(%task_id, action = name, error = %e, "Unable to run action");
                    (e.to_string(), BAD_ACTION_OUTPUT.to_string())
                }
            };

        let record = self
            .db
            .create_action(task_id, name, answer.args(), answer.reasoning(), &action_output)
            .await?;
        tracing::info!(
            %task_id,
            step_id = %step.step_id,
            action_id = %record.action_id,
            action = name,
            "Step completed"
        );

        step.status = StepStatus::Completed;
        step.output = Some(step_output);
        Ok(self.db.update_step(&step).await?)
    }

    async fn finish_step(
        &self,
        task_id: Uuid,
        input: &str,
        answer: &AgentAnswer,
    ) -> Result<Step, AgentError> {
        let remark = answer.closing_remark();
        tracing::info!(%task_id, "Model considers the task complete");

        let mut new_step = NewStep::new(input);
        new_step.name = Some(FINISH_ACTION.to_string());
        new_step.status = StepStatus::Completed;
        new_step.is_last = true;
        new_step.additional_input = Some(json!({ "name": FINISH_ACTION, "output": remark }));
        let mut step = self.db.create_step(task_id, new_step).await?;
        step.output = Some(remark);
        Ok(self.db.update_step(&step).await?)
    }

    /// Completion with bounded retries. Transport and decode failures both
    /// count as a missing answer.
    async fn request_answer(
        &self,
        task_id: Uuid,
        messages: &[ChatMessage],
    ) -> Result<AgentAnswer, AgentError> {
        let retry = &self.config.retry;
        let attempts = retry.max_attempts.max(1);
        let model = &self.config.default_model;
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if !self.config.request_delay.is_zero() {
                tracing::debug!(
                    delay_secs = self.config.request_delay.as_secs(),
                    "Waiting before completion request"
                );
                tokio::time::sleep(self.config.request_delay).await;
            }

            let result = match self.llm.chat_completion(model, messages).await {
                Ok(reply) => AgentAnswer::parse(&reply).map_err(|e| {
                    tracing::error!(%task_id, reply = %preview(&reply), "Unable to decode chat response");
                    e.to_string()
                }),
                Err(e) => {
                    tracing::error!(%task_id, error = %e, "Unable to generate chat response");
                    Err(e.to_string())
                }
            };

            match result {
                Ok(answer) => return Ok(answer),
                Err(e) => last_error = e,
            }

            if attempt + 1 < attempts {
                let delay = retry.delay_for(attempt);
                tracing::warn!(
                    %task_id,
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs(),
                    "No usable answer, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(AgentError::RetriesExhausted {
            attempts,
            last_error,
        })
    }
}

fn preview(s: &str) -> &str {
    match s.char_indices().nth(80) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
