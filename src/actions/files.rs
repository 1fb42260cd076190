//! Workspace file actions.

use async_trait::async_trait;
use serde_json::Value;

use super::{str_arg, Action, ActionContext, ActionParameter};
use crate::agent::PromptEngine;
use crate::llm::ChatMessage;

const FILE_EDIT_INSTRUCTION: &str = "Reply only with the modified file contents and nothing else. Take a deep breath before starting and ensure the changes address the issue in a clear and concise manner.";

/// List directory entries.
pub struct ListFiles;

#[async_trait]
impl Action for ListFiles {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files in a directory and return a list of their names including the path parameter"
    }

    fn parameters(&self) -> Vec<ActionParameter> {
        vec![ActionParameter::required(
            "path",
            "string",
            "Path to the directory",
        )]
    }

    fn output_type(&self) -> &str {
        "list[str]"
    }

    async fn run(&self, ctx: &ActionContext<'_>, args: &Value) -> anyhow::Result<String> {
        let path = str_arg(args, "path")?;
        let entries = ctx.workspace.list(&ctx.task_key(), path).await?;
        Ok(serde_json::to_string(&entries)?)
    }
}

/// Read a file.
pub struct ReadFile;

#[async_trait]
impl Action for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read data from a file"
    }

    fn parameters(&self) -> Vec<ActionParameter> {
        vec![ActionParameter::required(
            "file_path",
            "string",
            "Path to the file",
        )]
    }

    fn output_type(&self) -> &str {
        "bytes"
    }

    async fn run(&self, ctx: &ActionContext<'_>, args: &Value) -> anyhow::Result<String> {
        let file_path = str_arg(args, "file_path")?;
        tracing::debug!(task_id = %ctx.task_id, file_path, "Reading file");
        read_text(ctx, file_path).await
    }
}

/// Write a file and record it as an artifact.
pub struct WriteFile;

#[async_trait]
impl Action for WriteFile {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write data to a file"
    }

    fn parameters(&self) -> Vec<ActionParameter> {
        vec![
            ActionParameter::required("file_path", "string", "Path to the file"),
            ActionParameter::required("data", "bytes", "Data to write to the file"),
        ]
    }

    fn output_type(&self) -> &str {
        "None"
    }

    async fn run(&self, ctx: &ActionContext<'_>, args: &Value) -> anyhow::Result<String> {
        let file_path = str_arg(args, "file_path")?;
        let data = match &args["data"] {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        write_artifact(ctx, file_path, &data).await
    }
}

/// Rewrite a file by asking the model to apply a change description.
pub struct ModifyFile;

#[async_trait]
impl Action for ModifyFile {
    fn name(&self) -> &str {
        "modify_file"
    }

    fn description(&self) -> &str {
        "Return an updated file contents with the changes requested applied."
    }

    fn parameters(&self) -> Vec<ActionParameter> {
        vec![
            ActionParameter::required("file_path", "string", "Path to the file"),
            ActionParameter::required(
                "changes_requested",
                "string",
                "description of the changes requested to the file. This is normally the task text that is provided.",
            ),
        ]
    }

    async fn run(&self, ctx: &ActionContext<'_>, args: &Value) -> anyhow::Result<String> {
        let file_path = str_arg(args, "file_path")?;
        let changes = str_arg(args, "changes_requested")?;

        let contents = read_text(ctx, file_path).await?;
        let prompt = PromptEngine::new()?.suggested_file_change(changes, &contents)?;
        let messages = [
            ChatMessage::system(FILE_EDIT_INSTRUCTION),
            ChatMessage::user(prompt),
        ];

        let reply = ctx
            .llm
            .chat_completion(&ctx.config.file_edit_model, &messages)
            .await?;
        let updated = strip_code_fence(&reply);
        tracing::debug!(task_id = %ctx.task_id, file_path, bytes = updated.len(), "Model rewrote file");

        write_artifact(ctx, file_path, updated).await
    }
}

async fn read_text(ctx: &ActionContext<'_>, file_path: &str) -> anyhow::Result<String> {
    let bytes = ctx.workspace.read(&ctx.task_key(), file_path).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn write_artifact(
    ctx: &ActionContext<'_>,
    file_path: &str,
    data: &str,
) -> anyhow::Result<String> {
    ctx.workspace
        .write(&ctx.task_key(), file_path, data.as_bytes())
        .await?;
    let file_name = file_path.rsplit('/').next().unwrap_or(file_path);
    let artifact = ctx
        .db
        .create_artifact(ctx.task_id, file_name, file_path, true)
        .await?;
    Ok(serde_json::to_string(&artifact)?)
}

/// Remove a single surrounding Markdown code fence, if the reply has one.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return reply;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return reply;
    };
    // Drop the info string (e.g. "rust") on the opening line.
    match body.split_once('\n') {
        Some((_, content)) => content,
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing::{FixedReply, Fixture};
    use crate::db::AgentDb;
    use serde_json::json;

    #[tokio::test]
    async fn write_then_read_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Fixture::new(dir.path()).await;
        let ctx = fixture.ctx();

        let out = WriteFile
            .run(&ctx, &json!({"file_path": "notes/todo.txt", "data": "buy milk"}))
            .await
            .unwrap();
        let artifact: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(artifact["file_name"], "todo.txt");
        assert_eq!(artifact["relative_path"], "notes/todo.txt");
        assert_eq!(artifact["agent_created"], true);

        let read = ReadFile
            .run(&ctx, &json!({"file_path": "notes/todo.txt"}))
            .await
            .unwrap();
        assert_eq!(read, "buy milk");

        let listed = ListFiles.run(&ctx, &json!({"path": "notes"})).await.unwrap();
        assert_eq!(listed, r#"["notes/todo.txt"]"#);

        let artifacts = fixture.db.list_artifacts(fixture.task_id).await.unwrap();
        assert_eq!(artifacts.len(), 1);
    }

    #[tokio::test]
    async fn write_rejects_paths_outside_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Fixture::new(dir.path()).await;
        let result = WriteFile
            .run(&fixture.ctx(), &json!({"file_path": "../escape.txt", "data": "x"}))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn modify_file_writes_model_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut fixture = Fixture::new(dir.path()).await;
        fixture.llm = FixedReply("```python\nprint('hello world')\n```".into());
        let ctx = fixture.ctx();

        WriteFile
            .run(&ctx, &json!({"file_path": "app.py", "data": "print('hi')"}))
            .await
            .unwrap();
        ModifyFile
            .run(
                &ctx,
                &json!({"file_path": "app.py", "changes_requested": "greet the world"}),
            )
            .await
            .unwrap();

        let read = ReadFile
            .run(&ctx, &json!({"file_path": "app.py"}))
            .await
            .unwrap();
        assert_eq!(read, "print('hello world')\n");
    }

    #[test]
    fn strip_code_fence_variants() {
        assert_eq!(strip_code_fence("plain"), "plain");
        assert_eq!(strip_code_fence("```\nbody\n```"), "body\n");
        assert_eq!(strip_code_fence("```rust\nfn a() {}\n```\n"), "fn a() {}\n");
        assert_eq!(strip_code_fence("```unterminated"), "```unterminated");
    }
}
