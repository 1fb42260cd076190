//! HTTP route handlers for the agent protocol.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::agent::Agent;
use crate::config::Config;
use crate::db::{AgentDb, Artifact, InMemoryAgentDb, SqliteAgentDb, Step, Task};
use crate::llm::OpenAiClient;

use super::types::{
    ApiError, CreateTaskRequest, HealthResponse, ListResponse, PageQuery, StepRequest,
};

/// Shared application state.
pub struct AppState {
    pub agent: Agent,
}

/// Build the agent from `config` and serve the API until shutdown.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let db: Arc<dyn AgentDb> = match &config.database_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Using SQLite agent database");
            Arc::new(SqliteAgentDb::open(path)?)
        }
        None => {
            tracing::info!("Using in-memory agent database");
            Arc::new(InMemoryAgentDb::new())
        }
    };
    let llm = Arc::new(OpenAiClient::new(
        config.api_key.clone(),
        config.api_base_url.clone(),
        config.llm_timeout,
    )?);
    let addr = format!("{}:{}", config.host, config.port);

    let agent = Agent::new(config, llm, db)?;
    let app = router(Arc::new(AppState { agent }));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// All routes with tracing and CORS layers applied.
pub fn router(state: Arc<AppState>) -> Router {
    let agent_routes = Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/:task_id", get(get_task))
        .route("/tasks/:task_id/steps", get(list_steps).post(execute_step))
        .route("/tasks/:task_id/steps/:step_id", get(get_step))
        .route("/tasks/:task_id/artifacts", get(list_artifacts))
        .route(
            "/tasks/:task_id/artifacts/:artifact_id",
            get(download_artifact),
        );

    Router::new()
        .route("/health", get(health))
        .nest("/ap/v1/agent", agent_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if req.input.trim().is_empty() {
        return Err(ApiError::BadRequest("input is required".to_string()));
    }
    let task = state.agent.create_task(&req.input, req.additional_input).await?;
    Ok(Json(task))
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ListResponse<Task>>, ApiError> {
    let tasks = state.agent.db().list_tasks().await?;
    Ok(Json(ListResponse::paginate(tasks, &query)?))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let task_id = parse_id(&task_id, "task")?;
    Ok(Json(state.agent.db().get_task(task_id).await?))
}

async fn execute_step(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    body: Bytes,
) -> Result<Json<Step>, ApiError> {
    let task_id = parse_id(&task_id, "task")?;
    // Only an absent body means "reuse the task input".
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        StepRequest::default()
    } else {
        serde_json::from_slice::<StepRequest>(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid step request: {}", e)))?
    };
    let step = state.agent.execute_step(task_id, request).await?;
    Ok(Json(step))
}

async fn list_steps(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ListResponse<Step>>, ApiError> {
    let task_id = parse_id(&task_id, "task")?;
    let db = state.agent.db();
    db.get_task(task_id).await?;
    let steps = db.list_steps(task_id).await?;
    Ok(Json(ListResponse::paginate(steps, &query)?))
}

async fn get_step(
    State(state): State<Arc<AppState>>,
    Path((task_id, step_id)): Path<(String, String)>,
) -> Result<Json<Step>, ApiError> {
    let task_id = parse_id(&task_id, "task")?;
    let step_id = parse_id(&step_id, "step")?;
    Ok(Json(state.agent.db().get_step(task_id, step_id).await?))
}

async fn list_artifacts(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ListResponse<Artifact>>, ApiError> {
    let task_id = parse_id(&task_id, "task")?;
    let db = state.agent.db();
    db.get_task(task_id).await?;
    let artifacts = db.list_artifacts(task_id).await?;
    Ok(Json(ListResponse::paginate(artifacts, &query)?))
}

async fn download_artifact(
    State(state): State<Arc<AppState>>,
    Path((task_id, artifact_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let task_id = parse_id(&task_id, "task")?;
    let artifact_id = parse_id(&artifact_id, "artifact")?;
    let artifact = state.agent.db().get_artifact(task_id, artifact_id).await?;
    let bytes = state
        .agent
        .workspace()
        .read(&task_id.to_string(), &artifact.relative_path)
        .await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        artifact.file_name.replace('"', "")
    );
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

fn parse_id(raw: &str, kind: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid {} id: {}", kind, raw)))
}
