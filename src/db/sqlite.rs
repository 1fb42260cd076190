//! SQLite-backed agent store.
//!
//! Ids and timestamps are stored as text, argument maps and additional input
//! as JSON text. Insertion order (rowid) defines list order.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{ActionRecord, AgentDb, Artifact, DbError, NewStep, Step, StepStatus, Task};
use crate::llm::{ChatMessage, Role};

const SCHEMA_VERSION: i32 = 1;

#[derive(Clone)]
pub struct SqliteAgentDb {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAgentDb {
    /// Open (or create) the database file and run pending migrations.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        info!("Opening agent database at {}", path.display());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbError::Backend(format!("create {}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )?;
        Self::init(conn)
    }

    /// In-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        let version = get_schema_version(&conn)?;
        debug!("Current schema version: {}", version);
        if version < 1 {
            migrate_v1(&conn)?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn get_schema_version(conn: &Connection) -> rusqlite::Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;
    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

fn migrate_v1(conn: &Connection) -> rusqlite::Result<()> {
    info!("Running migration v1");
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            task_id TEXT PRIMARY KEY,
            input TEXT NOT NULL,
            additional_input TEXT,
            created_at TEXT NOT NULL,
            modified_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS steps (
            step_id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
            name TEXT,
            input TEXT NOT NULL,
            additional_input TEXT,
            status TEXT NOT NULL,
            output TEXT,
            is_last INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            modified_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_steps_task ON steps(task_id);

        CREATE TABLE IF NOT EXISTS artifacts (
            artifact_id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
            file_name TEXT NOT NULL,
            relative_path TEXT NOT NULL,
            agent_created INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_artifacts_task ON artifacts(task_id);

        CREATE TABLE IF NOT EXISTS chat_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chat_task ON chat_messages(task_id);

        CREATE TABLE IF NOT EXISTS actions (
            action_id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            args TEXT NOT NULL,
            reason TEXT NOT NULL,
            output TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_actions_task ON actions(task_id);
        "#,
    )?;
    set_schema_version(conn, SCHEMA_VERSION)?;
    info!("Migration v1 completed successfully");
    Ok(())
}

fn parse_uuid(raw: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(raw).map_err(|e| DbError::Backend(format!("invalid id '{}': {}", raw, e)))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DbError::Backend(format!("invalid timestamp '{}': {}", raw, e)))
}

fn parse_json(raw: Option<String>) -> Result<Option<Value>, DbError> {
    raw.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
}

fn to_json(value: Option<&Value>) -> Result<Option<String>, DbError> {
    value.map(serde_json::to_string).transpose().map_err(Into::into)
}

fn task_exists(conn: &Connection, task_id: Uuid) -> Result<(), DbError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT task_id FROM tasks WHERE task_id = ?1",
            [task_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    found
        .map(|_| ())
        .ok_or_else(|| DbError::not_found("task", task_id))
}

type TaskRow = (String, String, Option<String>, String, String);

fn task_from_row(row: TaskRow) -> Result<Task, DbError> {
    let (task_id, input, additional_input, created_at, modified_at) = row;
    Ok(Task {
        task_id: parse_uuid(&task_id)?,
        input,
        additional_input: parse_json(additional_input)?,
        created_at: parse_time(&created_at)?,
        modified_at: parse_time(&modified_at)?,
        artifacts: Vec::new(),
    })
}

type StepRow = (
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    String,
    Option<String>,
    bool,
    String,
    String,
);

const STEP_COLUMNS: &str = "task_id, step_id, name, input, additional_input, status, output, is_last, created_at, modified_at";

fn read_step_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StepRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn step_from_row(row: StepRow) -> Result<Step, DbError> {
    let (task_id, step_id, name, input, additional_input, status, output, is_last, created, modified) =
        row;
    Ok(Step {
        task_id: parse_uuid(&task_id)?,
        step_id: parse_uuid(&step_id)?,
        name,
        input,
        additional_input: parse_json(additional_input)?,
        status: StepStatus::from_str(&status)?,
        output,
        is_last,
        created_at: parse_time(&created)?,
        modified_at: parse_time(&modified)?,
    })
}

type ArtifactRow = (String, String, String, bool, String);

fn artifact_from_row(row: ArtifactRow) -> Result<Artifact, DbError> {
    let (artifact_id, file_name, relative_path, agent_created, created_at) = row;
    Ok(Artifact {
        artifact_id: parse_uuid(&artifact_id)?,
        file_name,
        relative_path,
        agent_created,
        created_at: parse_time(&created_at)?,
    })
}

fn load_artifacts(conn: &Connection, task_id: Uuid) -> Result<Vec<Artifact>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT artifact_id, file_name, relative_path, agent_created, created_at
         FROM artifacts WHERE task_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([task_id.to_string()], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
        })?
        .collect::<rusqlite::Result<Vec<ArtifactRow>>>()?;
    rows.into_iter().map(artifact_from_row).collect()
}

fn load_task(conn: &Connection, task_id: Uuid) -> Result<Task, DbError> {
    let row: Option<TaskRow> = conn
        .query_row(
            "SELECT task_id, input, additional_input, created_at, modified_at
             FROM tasks WHERE task_id = ?1",
            [task_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .optional()?;
    let mut task = task_from_row(row.ok_or_else(|| DbError::not_found("task", task_id))?)?;
    task.artifacts = load_artifacts(conn, task_id)?;
    Ok(task)
}

fn load_step(conn: &Connection, task_id: Uuid, step_id: Uuid) -> Result<Step, DbError> {
    let sql = format!(
        "SELECT {} FROM steps WHERE task_id = ?1 AND step_id = ?2",
        STEP_COLUMNS
    );
    let row = conn
        .query_row(
            &sql,
            params![task_id.to_string(), step_id.to_string()],
            read_step_row,
        )
        .optional()?;
    step_from_row(row.ok_or_else(|| DbError::not_found("step", step_id))?)
}

#[async_trait]
impl AgentDb for SqliteAgentDb {
    fn is_persistent(&self) -> bool {
        true
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
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tasks (task_id, input, additional_input, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                task.task_id.to_string(),
                task.input,
                to_json(task.additional_input.as_ref())?,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(task)
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Task, DbError> {
        let conn = self.conn.lock().await;
        load_task(&conn, task_id)
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, DbError> {
        let conn = self.conn.lock().await;
        let ids = {
            let mut stmt = conn.prepare("SELECT task_id FROM tasks ORDER BY rowid")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids
        };
        ids.iter()
            .map(|id| load_task(&conn, parse_uuid(id)?))
            .collect()
    }

    async fn create_step(&self, task_id: Uuid, new: NewStep) -> Result<Step, DbError> {
        let conn = self.conn.lock().await;
        task_exists(&conn, task_id)?;
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
        conn.execute(
            &format!(
                "INSERT INTO steps ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                STEP_COLUMNS
            ),
            params![
                step.task_id.to_string(),
                step.step_id.to_string(),
                step.name,
                step.input,
                to_json(step.additional_input.as_ref())?,
                step.status.as_str(),
                step.output,
                step.is_last,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(step)
    }

    async fn update_step(&self, step: &Step) -> Result<Step, DbError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE steps SET name = ?1, additional_input = ?2, status = ?3, output = ?4,
                              is_last = ?5, modified_at = ?6
             WHERE task_id = ?7 AND step_id = ?8",
            params![
                step.name,
                to_json(step.additional_input.as_ref())?,
                step.status.as_str(),
                step.output,
                step.is_last,
                Utc::now().to_rfc3339(),
                step.task_id.to_string(),
                step.step_id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(DbError::not_found("step", step.step_id));
        }
        load_step(&conn, step.task_id, step.step_id)
    }

    async fn get_step(&self, task_id: Uuid, step_id: Uuid) -> Result<Step, DbError> {
        let conn = self.conn.lock().await;
        load_step(&conn, task_id, step_id)
    }

    async fn list_steps(&self, task_id: Uuid) -> Result<Vec<Step>, DbError> {
        let conn = self.conn.lock().await;
        task_exists(&conn, task_id)?;
        let sql = format!(
            "SELECT {} FROM steps WHERE task_id = ?1 ORDER BY rowid",
            STEP_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([task_id.to_string()], read_step_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(step_from_row).collect()
    }

    async fn create_artifact(
        &self,
        task_id: Uuid,
        file_name: &str,
        relative_path: &str,
        agent_created: bool,
    ) -> Result<Artifact, DbError> {
        let conn = self.conn.lock().await;
        task_exists(&conn, task_id)?;
        let artifact = Artifact {
            artifact_id: Uuid::new_v4(),
            file_name: file_name.to_string(),
            relative_path: relative_path.to_string(),
            agent_created,
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO artifacts (artifact_id, task_id, file_name, relative_path, agent_created, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                artifact.artifact_id.to_string(),
                task_id.to_string(),
                artifact.file_name,
                artifact.relative_path,
                artifact.agent_created,
                artifact.created_at.to_rfc3339(),
            ],
        )?;
        Ok(artifact)
    }

    async fn get_artifact(&self, task_id: Uuid, artifact_id: Uuid) -> Result<Artifact, DbError> {
        let conn = self.conn.lock().await;
        let row: Option<ArtifactRow> = conn
            .query_row(
                "SELECT artifact_id, file_name, relative_path, agent_created, created_at
                 FROM artifacts WHERE task_id = ?1 AND artifact_id = ?2",
                params![task_id.to_string(), artifact_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;
        artifact_from_row(row.ok_or_else(|| DbError::not_found("artifact", artifact_id))?)
    }

    async fn list_artifacts(&self, task_id: Uuid) -> Result<Vec<Artifact>, DbError> {
        let conn = self.conn.lock().await;
        task_exists(&conn, task_id)?;
        load_artifacts(&conn, task_id)
    }

    async fn add_chat_history(
        &self,
        task_id: Uuid,
        messages: &[ChatMessage],
    ) -> Result<(), DbError> {
        let mut conn = self.conn.lock().await;
        task_exists(&conn, task_id)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chat_messages (task_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            let now = Utc::now().to_rfc3339();
            for message in messages {
                stmt.execute(params![
                    task_id.to_string(),
                    message.role.as_str(),
                    message.content,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_chat_history(&self, task_id: Uuid) -> Result<Vec<ChatMessage>, DbError> {
        let conn = self.conn.lock().await;
        task_exists(&conn, task_id)?;
        let mut stmt = conn.prepare(
            "SELECT role, content FROM chat_messages WHERE task_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([task_id.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(role, content)| {
                let role = Role::from_str(&role).map_err(DbError::Backend)?;
                Ok(ChatMessage { role, content })
            })
            .collect()
    }

    async fn create_action(
        &self,
        task_id: Uuid,
        name: &str,
        args: &Value,
        reason: &str,
        output: &str,
    ) -> Result<ActionRecord, DbError> {
        let conn = self.conn.lock().await;
        task_exists(&conn, task_id)?;
        let action = ActionRecord {
            action_id: Uuid::new_v4(),
            name: name.to_string(),
            args: args.clone(),
            reason: reason.to_string(),
            output: output.to_string(),
            created_at: Utc::now(),
        };
        conn.execute(
            "INSERT INTO actions (action_id, task_id, name, args, reason, output, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                action.action_id.to_string(),
                task_id.to_string(),
                action.name,
                serde_json::to_string(&action.args)?,
                action.reason,
                action.output,
                action.created_at.to_rfc3339(),
            ],
        )?;
        Ok(action)
    }

    async fn get_action_history(&self, task_id: Uuid) -> Result<Vec<ActionRecord>, DbError> {
        let conn = self.conn.lock().await;
        task_exists(&conn, task_id)?;
        let mut stmt = conn.prepare(
            "SELECT action_id, name, args, reason, output, created_at
             FROM actions WHERE task_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map([task_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(action_id, name, args, reason, output, created_at)| {
                Ok(ActionRecord {
                    action_id: parse_uuid(&action_id)?,
                    name,
                    args: serde_json::from_str(&args)?,
                    reason,
                    output,
                    created_at: parse_time(&created_at)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::contract;

    #[tokio::test]
    async fn task_roundtrip() {
        contract::task_roundtrip(&SqliteAgentDb::open_in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn steps_and_updates() {
        contract::steps_and_updates(&SqliteAgentDb::open_in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn chat_and_actions() {
        contract::chat_and_actions(&SqliteAgentDb::open_in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn artifacts() {
        contract::artifacts(&SqliteAgentDb::open_in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/agent.db");

        let task_id = {
            let db = SqliteAgentDb::open(&path).unwrap();
            assert!(db.is_persistent());
            let task = db.create_task("persist me", None).await.unwrap();
            db.add_chat_message(task.task_id, Role::System, "sys")
                .await
                .unwrap();
            task.task_id
        };

        let db = SqliteAgentDb::open(&path).unwrap();
        assert_eq!(db.get_task(task_id).await.unwrap().input, "persist me");
        assert_eq!(
            db.get_chat_history(task_id).await.unwrap(),
            vec![ChatMessage::system("sys")]
        );
    }
}
