//! API request and response types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentError;
use crate::db::DbError;
use crate::workspace::WorkspaceError;

pub use crate::agent::StepRequest;

/// Default number of items per page.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Request to create a new task.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    /// The task description / user prompt
    pub input: String,

    /// Free-form extra data stored with the task
    #[serde(default)]
    pub additional_input: Option<Value>,
}

/// `?page=&page_size=` query of list endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub total_items: usize,
    pub total_pages: usize,
    pub current_page: usize,
    pub page_size: usize,
}

/// One page of a list endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> ListResponse<T> {
    /// Cut `items` down to the requested page.
    pub fn paginate(items: Vec<T>, query: &PageQuery) -> Result<Self, ApiError> {
        let current_page = query.page.unwrap_or(1);
        let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if current_page == 0 {
            return Err(ApiError::BadRequest("page must be at least 1".to_string()));
        }
        if page_size == 0 {
            return Err(ApiError::BadRequest(
                "page_size must be at least 1".to_string(),
            ));
        }

        let total_items = items.len();
        let total_pages = total_items.div_ceil(page_size);
        let items = items
            .into_iter()
            .skip((current_page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        Ok(Self {
            items,
            pagination: Pagination {
                total_items,
                total_pages,
                current_page,
                page_size,
            },
        })
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}

/// Error rendered as `{"error": "..."}` with a matching status code.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => {
                tracing::error!(error = %m, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            DbError::Backend(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::TaskNotFound(_) => ApiError::NotFound(e.to_string()),
            AgentError::Db(db) => db.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<WorkspaceError> for ApiError {
    fn from(e: WorkspaceError) -> Self {
        match &e {
            WorkspaceError::OutsideWorkspace(_) => ApiError::BadRequest(e.to_string()),
            WorkspaceError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                ApiError::NotFound(e.to_string())
            }
            WorkspaceError::Io { .. } => ApiError::Internal(e.to_string()),
        }
    }
}
