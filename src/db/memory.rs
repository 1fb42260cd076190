//! In-memory agent store (non-persistent).

use super::{ActionRecord, AgentDb, Artifact, DbError, NewStep, Step, Task};
use crate::llm::ChatMessage;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

struct TaskEntry {
    task: Task,
    steps: Vec<Step>,
    artifacts: Vec<Artifact>,
    chat: Vec<ChatMessage>,
    actions: Vec<ActionRecord>,
}

#[derive(Clone, Default)]
pub struct InMemoryAgentDb {
    tasks: Arc<RwLock<HashMap<Uuid, TaskEntry>>>,
    order: Arc<RwLock<Vec<Uuid>>>,
}

impl InMemoryAgentDb {
    pub fn new() -> Self {
        Self::default()
    }
}

fn task_entry<'a>(
    tasks: &'a mut HashMap<Uuid, TaskEntry>,
    task_id: Uuid,
) -> Result<&'a mut TaskEntry, DbError> {
    tasks
        .get_mut(&task_id)
        .ok_or_else(|| DbError::not_found("task", task_id))
}

#[async_trait]
impl AgentDb for InMemoryAgentDb {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn create_task(
        &self,
        input: &str,
        additional_input: Option<Value>,
    ) -> Result<Task, DbError> {
        let now = Utc::now();
        let task = Task {
            task_id: Uuid::new_v4(),
            input: input.to_string(),
            additional_input,
            created_at: now,
            modified_at: now,
            artifacts: Vec::new(),
        };
        self.tasks.write().await.insert(
            task.task_id,
            TaskEntry {
                task: task.clone(),
                steps: Vec::new(),
                artifacts: Vec::new(),
                chat: Vec::new(),
                actions: Vec::new(),
            },
        );
        self.order.write().await.push(task.task_id);
        Ok(task)
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Task, DbError> {
        let tasks = self.tasks.read().await;
        let entry = tasks
            .get(&task_id)
            .ok_or_else(|| DbError::not_found("task", task_id))?;
        let mut task = entry.task.clone();
        task.artifacts = entry.artifacts.clone();
        Ok(task)
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, DbError> {
        let order = self.order.read().await.clone();
        let mut tasks = Vec::with_capacity(order.len());
        for id in order {
            tasks.push(self.get_task(id).await?);
        }
        Ok(tasks)
    }

    async fn create_step(&self, task_id: Uuid, new: NewStep) -> Result<Step, DbError> {
        let mut tasks = self.tasks.write().await;
        let entry = task_entry(&mut tasks, task_id)?;
        let now = Utc::now();
        let step = Step {
            task_id,
            step_id: Uuid::new_v4(),
            name: new.name,
            input: new.input,
            additional_input: new.additional_input,
            status: new.status,
            output: None,
            is_last: new.is_last,
            created_at: now,
            modified_at: now,
        };
        entry.steps.push(step.clone());
        Ok(step)
    }

    async fn update_step(&self, step: &Step) -> Result<Step, DbError> {
        let mut tasks = self.tasks.write().await;
        let entry = task_entry(&mut tasks, step.task_id)?;
        let stored = entry
            .steps
            .iter_mut()
            .find(|s| s.step_id == step.step_id)
            .ok_or_else(|| DbError::not_found("step", step.step_id))?;
        stored.name = step.name.clone();
        stored.additional_input = step.additional_input.clone();
        stored.status = step.status;
        stored.output = step.output.clone();
        stored.is_last = step.is_last;
        stored.modified_at = Utc::now();
        Ok(stored.clone())
    }

    async fn get_step(&self, task_id: Uuid, step_id: Uuid) -> Result<Step, DbError> {
        self.tasks
            .read()
            .await
            .get(&task_id)
            .and_then(|e| e.steps.iter().find(|s| s.step_id == step_id).cloned())
            .ok_or_else(|| DbError::not_found("step", step_id))
    }

    async fn list_steps(&self, task_id: Uuid) -> Result<Vec<Step>, DbError> {
        let tasks = self.tasks.read().await;
        let entry = tasks
            .get(&task_id)
            .ok_or_else(|| DbError::not_found("task", task_id))?;
        Ok(entry.steps.clone())
    }

    async fn create_artifact(
        &self,
        task_id: Uuid,
        file_name: &str,
        relative_path: &str,
        agent_created: bool,
    ) -> Result<Artifact, DbError> {
        let mut tasks = self.tasks.write().await;
        let entry = task_entry(&mut tasks, task_id)?;
        let artifact = Artifact {
            artifact_id: Uuid::new_v4(),
            file_name: file_name.to_string(),
            relative_path: relative_path.to_string(),
            agent_created,
            created_at: Utc::now(),
        };
        entry.artifacts.push(artifact.clone());
        Ok(artifact)
    }

    async fn get_artifact(&self, task_id: Uuid, artifact_id: Uuid) -> Result<Artifact, DbError> {
        self.tasks
            .read()
            .await
            .get(&task_id)
            .and_then(|e| {
                e.artifacts
                    .iter()
                    .find(|a| a.artifact_id == artifact_id)
                    .cloned()
            })
            .ok_or_else(|| DbError::not_found("artifact", artifact_id))
    }

    async fn list_artifacts(&self, task_id: Uuid) -> Result<Vec<Artifact>, DbError> {
        let tasks = self.tasks.read().await;
        let entry = tasks
            .get(&task_id)
            .ok_or_else(|| DbError::not_found("task", task_id))?;
        Ok(entry.artifacts.clone())
    }

    async fn add_chat_history(
        &self,
        task_id: Uuid,
        messages: &[ChatMessage],
    ) -> Result<(), DbError> {
        let mut tasks = self.tasks.write().await;
        let entry = task_entry(&mut tasks, task_id)?;
        entry.chat.extend_from_slice(messages);
        Ok(())
    }

    async fn get_chat_history(&self, task_id: Uuid) -> Result<Vec<ChatMessage>, DbError> {
        let tasks = self.tasks.read().await;
        let entry = tasks
            .get(&task_id)
            .ok_or_else(|| DbError::not_found("task", task_id))?;
        Ok(entry.chat.clone())
    }

    async fn create_action(
        &self,
        task_id: Uuid,
        name: &str,
        args: &Value,
        reason: &str,
        output: &str,
    ) -> Result<ActionRecord, DbError> {
        let mut tasks = self.tasks.write().await;
        let entry = task_entry(&mut tasks, task_id)?;
        let action = ActionRecord {
            action_id: Uuid::new_v4(),
            name: name.to_string(),
            args: args.clone(),
            reason: reason.to_string(),
            output: output.to_string(),
            created_at: Utc::now(),
        };
        entry.actions.push(action.clone());
        Ok(action)
    }

    async fn get_action_history(&self, task_id: Uuid) -> Result<Vec<ActionRecord>, DbError> {
        let tasks = self.tasks.read().await;
        let entry = tasks
            .get(&task_id)
            .ok_or_else(|| DbError::not_found("task", task_id))?;
        Ok(entry.actions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::contract;

    #[tokio::test]
    async fn task_roundtrip() {
        contract::task_roundtrip(&InMemoryAgentDb::new()).await;
    }

    #[tokio::test]
    async fn steps_and_updates() {
        contract::steps_and_updates(&InMemoryAgentDb::new()).await;
    }

    #[tokio::test]
    async fn chat_and_actions() {
        contract::chat_and_actions(&InMemoryAgentDb::new()).await;
    }

    #[tokio::test]
    async fn artifacts() {
        contract::artifacts(&InMemoryAgentDb::new()).await;
    }

    #[test]
    fn is_not_persistent() {
        assert!(!InMemoryAgentDb::new().is_persistent());
    }
}
