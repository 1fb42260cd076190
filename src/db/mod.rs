//! Task, step, artifact, chat and action persistence.
//!
//! Two backends implement [`AgentDb`]: [`InMemoryAgentDb`] for tests and
//! throwaway runs, and [`SqliteAgentDb`] when `DATABASE_PATH` is configured.

mod memory;
mod sqlite;

pub use memory::InMemoryAgentDb;
pub use sqlite::SqliteAgentDb;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::llm::{ChatMessage, Role};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl DbError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        Self::Backend(format!("invalid stored JSON: {}", e))
    }
}

/// A unit of work identified by its initial input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub task_id: Uuid,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_input: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

/// Lifecycle of a step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Created,
    Running,
    Completed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Created => "created",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(StepStatus::Created),
            "running" => Ok(StepStatus::Running),
            "completed" => Ok(StepStatus::Completed),
            other => Err(DbError::Backend(format!("unknown step status: {}", other))),
        }
    }
}

/// One LLM round-trip plus at most one action invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub task_id: Uuid,
    pub step_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_input: Option<Value>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub is_last: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Fields for a step about to be created.
#[derive(Debug, Clone)]
pub struct NewStep {
    pub name: Option<String>,
    pub input: String,
    pub additional_input: Option<Value>,
    pub status: StepStatus,
    pub is_last: bool,
}

impl NewStep {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            name: None,
            input: input.into(),
            additional_input: None,
            status: StepStatus::Created,
            is_last: false,
        }
    }
}

/// A file the agent produced in the task workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub artifact_id: Uuid,
    pub file_name: String,
    pub relative_path: String,
    pub agent_created: bool,
    pub created_at: DateTime<Utc>,
}

/// A previously executed action, replayed into later prompts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRecord {
    pub action_id: Uuid,
    pub name: String,
    pub args: Value,
    pub reason: String,
    pub output: String,
    pub created_at: DateTime<Utc>,
}

/// Persistence used by the agent and the HTTP API.
#[async_trait]
pub trait AgentDb: Send + Sync {
    /// Whether records survive a restart.
    fn is_persistent(&self) -> bool;

    async fn create_task(
        &self,
        input: &str,
        additional_input: Option<Value>,
    ) -> Result<Task, DbError>;

    /// Fetch a task with its artifacts.
    async fn get_task(&self, task_id: Uuid) -> Result<Task, DbError>;

    /// All tasks, oldest first.
    async fn list_tasks(&self) -> Result<Vec<Task>, DbError>;

    async fn create_step(&self, task_id: Uuid, step: NewStep) -> Result<Step, DbError>;

    /// Persist name, status, output, additional input and `is_last` of `step`.
    async fn update_step(&self, step: &Step) -> Result<Step, DbError>;

    async fn get_step(&self, task_id: Uuid, step_id: Uuid) -> Result<Step, DbError>;

    /// Steps of a task in creation order.
    async fn list_steps(&self, task_id: Uuid) -> Result<Vec<Step>, DbError>;

    async fn create_artifact(
        &self,
        task_id: Uuid,
        file_name: &str,
        relative_path: &str,
        agent_created: bool,
    ) -> Result<Artifact, DbError>;

    async fn get_artifact(&self, task_id: Uuid, artifact_id: Uuid) -> Result<Artifact, DbError>;

    async fn list_artifacts(&self, task_id: Uuid) -> Result<Vec<Artifact>, DbError>;

    async fn add_chat_history(&self, task_id: Uuid, messages: &[ChatMessage])
        -> Result<(), DbError>;

    async fn add_chat_message(
        &self,
        task_id: Uuid,
        role: Role,
        content: &str,
    ) -> Result<(), DbError> {
        self.add_chat_history(
            task_id,
            &[ChatMessage {
                role,
                content: content.to_string(),
            }],
        )
        .await
    }

    async fn get_chat_history(&self, task_id: Uuid) -> Result<Vec<ChatMessage>, DbError>;

    async fn create_action(
        &self,
        task_id: Uuid,
        name: &str,
        args: &Value,
        reason: &str,
        output: &str,
    ) -> Result<ActionRecord, DbError>;

    /// Actions of a task in execution order.
    async fn get_action_history(&self, task_id: Uuid) -> Result<Vec<ActionRecord>, DbError>;
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every backend must share.

    use super::*;
    use serde_json::json;

    pub async fn task_roundtrip(db: &dyn AgentDb) {
        let task = db
            .create_task("write hello.txt", Some(json!({"priority": 1})))
            .await
            .unwrap();
        let fetched = db.get_task(task.task_id).await.unwrap();
        assert_eq!(fetched.input, "write hello.txt");
        assert_eq!(fetched.additional_input, Some(json!({"priority": 1})));
        assert!(fetched.artifacts.is_empty());

        let second = db.create_task("second", None).await.unwrap();
        let ids: Vec<Uuid> = db
            .list_tasks()
            .await
            .unwrap()
            .iter()
            .map(|t| t.task_id)
            .collect();
        assert_eq!(ids, vec![task.task_id, second.task_id]);

        assert!(matches!(
            db.get_task(Uuid::new_v4()).await,
            Err(DbError::NotFound { kind: "task", .. })
        ));
    }

    pub async fn steps_and_updates(db: &dyn AgentDb) {
        let task = db.create_task("t", None).await.unwrap();
        let mut step = db
            .create_step(
                task.task_id,
                NewStep {
                    status: StepStatus::Running,
                    ..NewStep::new("do it")
                },
            )
            .await
            .unwrap();
        assert_eq!(step.status, StepStatus::Running);
        assert!(!step.is_last);

        step.name = Some("write_file".into());
        step.output = Some("done".into());
        step.status = StepStatus::Completed;
        db.update_step(&step).await.unwrap();

        let fetched = db.get_step(task.task_id, step.step_id).await.unwrap();
        assert_eq!(fetched.name.as_deref(), Some("write_file"));
        assert_eq!(fetched.output.as_deref(), Some("done"));
        assert_eq!(fetched.status, StepStatus::Completed);

        let last = db
            .create_step(
                task.task_id,
                NewStep {
                    is_last: true,
                    ..NewStep::new("finish")
                },
            )
            .await
            .unwrap();
        let steps = db.list_steps(task.task_id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].step_id, last.step_id);
        assert!(steps[1].is_last);

        assert!(db.get_step(task.task_id, Uuid::new_v4()).await.is_err());
        assert!(db
            .create_step(Uuid::new_v4(), NewStep::new("x"))
            .await
            .is_err());
    }

    pub async fn chat_and_actions(db: &dyn AgentDb) {
        let task = db.create_task("t", None).await.unwrap();
        assert!(db.get_chat_history(task.task_id).await.unwrap().is_empty());

        db.add_chat_history(
            task.task_id,
            &[ChatMessage::system("sys"), ChatMessage::user("task")],
        )
        .await
        .unwrap();
        db.add_chat_message(task.task_id, Role::User, "again")
            .await
            .unwrap();
        let history = db.get_chat_history(task.task_id).await.unwrap();
        assert_eq!(
            history,
            vec![
                ChatMessage::system("sys"),
                ChatMessage::user("task"),
                ChatMessage::user("again"),
            ]
        );

        db.create_action(
            task.task_id,
            "read_file",
            &json!({"file_path": "a.txt"}),
            "need contents",
            "hello",
        )
        .await
        .unwrap();
        db.create_action(task.task_id, "finish", &json!({}), "done", "")
            .await
            .unwrap();
        let actions = db.get_action_history(task.task_id).await.unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].name, "read_file");
        assert_eq!(actions[0].args, json!({"file_path": "a.txt"}));
        assert_eq!(actions[0].output, "hello");
        assert_eq!(actions[1].name, "finish");
    }

    pub async fn artifacts(db: &dyn AgentDb) {
        let task = db.create_task("t", None).await.unwrap();
        let artifact = db
            .create_artifact(task.task_id, "out.txt", "dir/out.txt", true)
            .await
            .unwrap();
        assert_eq!(
            db.get_artifact(task.task_id, artifact.artifact_id)
                .await
                .unwrap(),
            artifact
        );
        assert_eq!(db.list_artifacts(task.task_id).await.unwrap(), vec![artifact.clone()]);
        assert_eq!(db.get_task(task.task_id).await.unwrap().artifacts, vec![artifact]);
        assert!(db
            .get_artifact(task.task_id, Uuid::new_v4())
            .await
            .is_err());
    }
}
